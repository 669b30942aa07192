use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.json";
const LOCAL_CONFIG_FILE: &str = "remotetalk.json";

// First environment variable that is set wins; an empty suffix uses the value as-is
fn resolve_from_env<F>(env_paths: &[(&str, &str)], lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    env_paths.iter().find_map(|(env_var, suffix)| {
        let env_value = lookup(env_var).filter(|v| !v.is_empty())?;
        Some(if suffix.is_empty() {
            PathBuf::from(env_value)
        } else {
            PathBuf::from(env_value).join(suffix)
        })
    })
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn config_path_with<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let config_file = format!("remotetalk/{}", CONFIG_FILE_NAME);
    let home_config_file = format!(".config/remotetalk/{}", CONFIG_FILE_NAME);
    let env_paths = [
        ("REMOTETALK_CONFIG", ""),
        ("XDG_CONFIG_HOME", config_file.as_str()),
        ("HOME", home_config_file.as_str()),
    ];
    resolve_from_env(&env_paths, lookup).unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE))
}

fn cache_dir_with<F>(export_dir: &str, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let data_dir = format!("remotetalk/{}", export_dir);
    let home_data_dir = format!(".local/share/remotetalk/{}", export_dir);
    let env_paths = [
        ("REMOTETALK_CACHE_DIR", ""),
        ("XDG_DATA_HOME", data_dir.as_str()),
        ("HOME", home_data_dir.as_str()),
    ];
    resolve_from_env(&env_paths, lookup).unwrap_or_else(|| PathBuf::from(export_dir))
}

/// Location of the configuration file (it does not have to exist)
pub fn get_config_path() -> PathBuf {
    config_path_with(env_var)
}

/// Directory holding exported talks, which doubles as the talk cache
pub fn get_cache_dir(export_dir: &str) -> PathBuf {
    cache_dir_with(export_dir, env_var)
}
