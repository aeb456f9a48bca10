//! Environment scrubbing for sandboxed children.

use std::collections::BTreeMap;
use std::ffi::OsString;

/// Build the complete environment for a child process.
///
/// Only variables named in `allowlist` are copied from `inherited`; every
/// other variable (tokens, proxies, credentials, `HOME`, ...) is dropped.
/// Names and values are kept as raw OS strings, so non-UTF-8 host variables
/// pass through untouched instead of failing the run. `extra` entries are
/// applied last and win over inherited values.
pub fn scrubbed_env<I, K, V>(
    inherited: I,
    allowlist: &[String],
    extra: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut env: BTreeMap<OsString, OsString> = inherited
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .filter(|(key, _)| allowlist.iter().any(|allowed| key == allowed.as_str()))
        .collect();
    for (key, value) in extra {
        env.insert(key.into(), value.into());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn allow(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn get<'a>(env: &'a BTreeMap<OsString, OsString>, key: &str) -> Option<&'a OsStr> {
        env.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    #[test]
    fn drops_everything_outside_allowlist() {
        let inherited = vec![
            ("PATH", "/usr/bin"),
            ("OPENAI_API_KEY", "sk-secret"),
            ("HTTPS_PROXY", "http://proxy:3128"),
            ("HOME", "/home/user"),
        ];
        let env = scrubbed_env(inherited, &allow(&["PATH", "TMPDIR"]), &BTreeMap::new());
        assert_eq!(env.len(), 1);
        assert_eq!(get(&env, "PATH"), Some(OsStr::new("/usr/bin")));
    }

    #[test]
    fn extra_entries_are_always_set() {
        let mut extra = BTreeMap::new();
        extra.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        let env = scrubbed_env(Vec::<(String, String)>::new(), &allow(&["PATH"]), &extra);
        assert_eq!(get(&env, "PYTHONUNBUFFERED"), Some(OsStr::new("1")));
    }

    #[test]
    fn allowlist_match_is_exact() {
        let inherited = vec![("PATHEXT", ".EXE"), ("path", "/bin")];
        let env = scrubbed_env(inherited, &allow(&["PATH"]), &BTreeMap::new());
        assert!(env.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_values_are_kept_or_dropped_without_failing() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'/', 0xff, 0xfe]);
        let inherited = vec![
            (OsString::from("TMPDIR"), raw.clone()),
            (OsString::from("GARBLED"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0xc3, 0x28]), OsString::from("x")),
        ];
        let env = scrubbed_env(inherited, &allow(&["TMPDIR"]), &BTreeMap::new());
        assert_eq!(env.len(), 1);
        assert_eq!(get(&env, "TMPDIR"), Some(raw.as_os_str()));
    }

    #[test]
    fn host_environment_scrubs_without_panicking() {
        let env = scrubbed_env(std::env::vars_os(), &allow(&["PATH"]), &BTreeMap::new());
        assert!(env.keys().all(|key| key == "PATH"));
    }
}
