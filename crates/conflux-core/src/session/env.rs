use std::collections::BTreeMap;

/// `PATH` handed to backend processes unless the server config overrides it.
pub const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Variables copied from the hub's own environment when present.
pub const INHERITED_ENV_VARS: &[&str] = &["HOME", "USER", "LANG", "LC_ALL", "TMPDIR", "TZ"];

/// Builds the complete environment for a backend process.
///
/// Backends are untrusted subprocesses: they get a fixed `PATH`, the
/// allow-listed variables from `lookup`, and the caller-supplied entries
/// (which take precedence). Nothing else from the ambient environment leaks.
pub fn restricted_env<F>(lookup: F, extra: &BTreeMap<String, String>) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), SAFE_PATH.to_string());

    for name in INHERITED_ENV_VARS {
        if let Some(value) = lookup(name) {
            env.insert((*name).to_string(), value);
        }
    }

    for (key, value) in extra {
        env.insert(key.clone(), value.clone());
    }

    env
}
