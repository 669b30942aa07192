use serde::{Deserialize, Serialize};

use crate::ipc::CastInfo;

/// A voice exposed by a talk server.
///
/// `id` is only meaningful for the session that enumerated it, and names are
/// not unique within one cast list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    /// Host label of the server the cast was enumerated from
    #[serde(default)]
    pub host: String,
}

impl Cast {
    pub fn from_info(info: CastInfo, host: &str) -> Self {
        Self {
            id: info.id,
            name: info.name,
            param_names: info.param_names,
            host: host.to_string(),
        }
    }
}

/// Clamps a requested cast index into `[0, casts.len() - 1]`.
///
/// With an empty cast list the index is returned unchanged: the server has
/// the final say over ids it never reported.
pub fn clamp_cast_index(index: i32, casts: &[Cast]) -> i32 {
    if casts.is_empty() {
        return index;
    }
    index.clamp(0, casts.len() as i32 - 1)
}

/// Cast at `index`, if the index is inside the list
pub fn cast_at(casts: &[Cast], index: i32) -> Option<&Cast> {
    usize::try_from(index).ok().and_then(|i| casts.get(i))
}

/// First cast matching `name` (and `host`, when given)
pub fn find_cast<'a>(casts: &'a [Cast], name: &str, host: Option<&str>) -> Option<&'a Cast> {
    casts
        .iter()
        .find(|c| c.name == name && host.map_or(true, |h| c.host == h))
}

/// Index of the first cast matching `name` (and `host`, when given)
pub fn find_cast_index(casts: &[Cast], name: &str, host: Option<&str>) -> Option<i32> {
    casts
        .iter()
        .position(|c| c.name == name && host.map_or(true, |h| c.host == h))
        .map(|i| i as i32)
}

/// Resolves a `--voice` argument: a numeric index or a cast name
pub fn resolve_voice(voice_input: &str, casts: &[Cast]) -> Option<i32> {
    if let Ok(index) = voice_input.parse::<i32>() {
        return Some(index);
    }
    find_cast_index(casts, voice_input, None)
}
