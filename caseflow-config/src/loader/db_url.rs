use std::{fs::read_to_string, path::Path};

use url::Url;

use crate::{
    ConfigLoadError,
    models::sources::{EnvConfig, FileDatabaseConfig},
};

const DEFAULT_PORT: u16 = 5432;

/// Resolve the PostgreSQL connection URL.
///
/// Precedence: `DATABASE_URL`, `DATABASE_URL_FILE`, `database.url` from the
/// file (with a password spliced in when it carries none), then a URL built
/// from host/user/name parts where env values win over file values.
pub fn resolve_database_url(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(url) = non_blank(env.database_url.as_deref()) {
        return Ok(Some(url));
    }

    if let Some(path) = env.database_url_file.as_ref()
        && let Some(url) = read_secret_file(path)?
    {
        return Ok(Some(url));
    }

    if let Some(stored_url) = non_blank(file_database.url.as_deref()) {
        let mut parsed = Url::parse(&stored_url).map_err(|source| {
            ConfigLoadError::InvalidDatabaseUrl { source }
        })?;
        if parsed.password().is_none()
            && let Some(password) =
                resolve_database_password(env, file_database)?
        {
            parsed.set_password(Some(&password)).map_err(|_| {
                ConfigLoadError::InvalidDatabasePassword
            })?;
        }
        return Ok(Some(parsed.to_string()));
    }

    let host = non_blank(env.database_host.as_deref())
        .or_else(|| non_blank(file_database.host.as_deref()));
    let user = non_blank(env.database_user.as_deref())
        .or_else(|| non_blank(file_database.user.as_deref()));
    let name = non_blank(env.database_name.as_deref())
        .or_else(|| non_blank(file_database.name.as_deref()));

    if let (Some(host), Some(user), Some(name)) = (host, user, name) {
        let port = env
            .database_port
            .or(file_database.port)
            .unwrap_or(DEFAULT_PORT);
        let mut url = Url::parse(&format!("postgresql://{host}:{port}/{name}"))
            .map_err(|source| ConfigLoadError::InvalidDatabaseUrl {
                source,
            })?;
        url.set_username(&user).map_err(|_| {
            ConfigLoadError::InvalidDatabaseUsername {
                username: user.clone(),
            }
        })?;
        if let Some(password) = resolve_database_password(env, file_database)? {
            url.set_password(Some(&password)).map_err(|_| {
                ConfigLoadError::InvalidDatabasePassword
            })?;
        }
        return Ok(Some(url.to_string()));
    }

    Ok(None)
}

pub fn resolve_database_password(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(password) = non_blank(env.database_password.as_deref()) {
        return Ok(Some(password));
    }

    for path in [
        env.database_password_file.as_ref(),
        file_database.password_file.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        if let Some(secret) = read_secret_file(path)? {
            return Ok(Some(secret));
        }
    }

    Ok(non_blank(file_database.password.as_deref()))
}

pub fn read_secret_file(
    path: &Path,
) -> Result<Option<String>, ConfigLoadError> {
    let contents = read_to_string(path).map_err(|source| {
        ConfigLoadError::SecretFileIo {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(non_blank(Some(&contents)))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
