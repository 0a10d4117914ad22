//! Bidirectional snowflake-to-name mapping.
//!
//! Backend entities are identified by snowflakes; IRC identifies channels
//! and users by name. An [`IdMap`] owns one namespace (the channels of a
//! guild, the nicknames of a guild) and guarantees that every id maps to
//! exactly one name and back. When two entities want the same name, the
//! later one is mangled with a `#`-delimited suffix derived from its own
//! id, so mangled names are stable across reconnects.

use std::collections::HashMap;

use crate::backend::Snowflake;

/// Strip the mangle delimiter from a requested name.
///
/// Sanitized names never contain `#`, which keeps the mangle suffix
/// unambiguous: everything after the first `#` in a stored name was added
/// by [`mangle`].
pub fn sanitize(name: &str) -> String {
    name.chars().filter(|&c| c != '#').collect()
}

/// Extend `name` with one more character of mangle suffix.
///
/// The suffix is drawn from the decimal digits of `id`; once those run out
/// the suffix grows with `#` padding. Called repeatedly, a name walks
/// through `name#1`, `name#12`, .. `name#12345`, `name#12345#`, and so on,
/// so two distinct ids always diverge eventually.
fn mangle(name: &str, id: Snowflake) -> String {
    let digits = id.0.to_string();
    let (base, have) = match name.split_once('#') {
        Some((base, suffix)) => (base, suffix.len()),
        None => (name, 0),
    };
    let want = have + 1;
    let mut suffix = String::with_capacity(want);
    suffix.push_str(&digits[..digits.len().min(want)]);
    while suffix.len() < want {
        suffix.push('#');
    }
    format!("{}#{}", base, suffix)
}

/// A collision-resistant bidirectional id/name map.
#[derive(Debug, Default)]
pub struct IdMap {
    forward: HashMap<Snowflake, String>,
    backward: HashMap<String, Snowflake>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `id` to `ideal`, mangling on collision.
    ///
    /// Returns the previously assigned name, if the id was renamed, and
    /// the name now assigned. Re-inserting an id with an ideal that
    /// sanitizes to its current base name is a no-op and returns the
    /// current name unchanged.
    pub fn insert(&mut self, id: Snowflake, ideal: &str) -> (Option<String>, String) {
        assert!(id.is_valid(), "inserting invalid id");
        assert!(!ideal.is_empty(), "inserting empty name");

        let wanted = sanitize(ideal);

        let mut previous = None;
        if let Some(current) = self.forward.get(&id) {
            let base = current.split('#').next().unwrap_or(current);
            if base == wanted {
                return (None, current.clone());
            }
            let old = self.forward.remove(&id);
            if let Some(ref old) = old {
                if self.backward.remove(old).is_none() {
                    panic!("idmap inconsistent: {:?} missing from name index", old);
                }
            }
            previous = old;
        }

        let mut name = wanted;
        while self.backward.contains_key(&name) {
            name = mangle(&name, id);
        }

        self.forward.insert(id, name.clone());
        self.backward.insert(name.clone(), id);
        (previous, name)
    }

    /// The name currently assigned to `id`.
    pub fn name(&self, id: Snowflake) -> Option<&str> {
        assert!(id.is_valid(), "looking up invalid id");
        self.forward.get(&id).map(String::as_str)
    }

    /// The id that owns `name`.
    pub fn snowflake(&self, name: &str) -> Option<Snowflake> {
        assert!(!name.is_empty(), "looking up empty name");
        self.backward.get(name).copied()
    }

    /// Remove `id` from the map. Returns whether it was present.
    pub fn remove(&mut self, id: Snowflake) -> bool {
        assert!(id.is_valid(), "removing invalid id");
        match self.forward.remove(&id) {
            Some(name) => {
                if self.backward.remove(&name) != Some(id) {
                    panic!("idmap inconsistent: {:?} missing from name index", name);
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
