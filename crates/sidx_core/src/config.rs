//! Database configuration.

/// How a unique index treats keys that contain a null component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniqueNullPolicy {
    /// Null-bearing keys are exempt from uniqueness and may be shared.
    #[default]
    Shared,
    /// Null-bearing keys are unique like any other key.
    Strict,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Null policy for `create_index` calls that carry no `ignoreNullValues`
    /// metadata. The single-property shorthand always includes nulls.
    pub ignore_null_values_default: bool,

    /// Uniqueness rule for null-bearing keys.
    pub unique_null_policy: UniqueNullPolicy,

    /// Whether to write a checkpoint after every commit (directory-backed only).
    pub persist_on_commit: bool,

    /// Whether to fsync files before renaming them into place.
    pub sync_on_write: bool,

    /// Records allowed to fail key derivation during a rebuild before the
    /// rebuild is declared failed.
    pub max_rebuild_errors: usize,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_null_values_default: false,
            unique_null_policy: UniqueNullPolicy::Shared,
            persist_on_commit: false,
            sync_on_write: true,
            max_rebuild_errors: 0,
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default null policy of the array-based creation API.
    #[must_use]
    pub const fn ignore_null_values_default(mut self, value: bool) -> Self {
        self.ignore_null_values_default = value;
        self
    }

    /// Sets the uniqueness rule for null-bearing keys.
    #[must_use]
    pub const fn unique_null_policy(mut self, policy: UniqueNullPolicy) -> Self {
        self.unique_null_policy = policy;
        self
    }

    /// Sets whether every commit is followed by a checkpoint.
    #[must_use]
    pub const fn persist_on_commit(mut self, value: bool) -> Self {
        self.persist_on_commit = value;
        self
    }

    /// Sets whether files are synced before rename.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the tolerated number of failing records per rebuild.
    #[must_use]
    pub const fn max_rebuild_errors(mut self, value: usize) -> Self {
        self.max_rebuild_errors = value;
        self
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(!config.ignore_null_values_default);
        assert_eq!(config.unique_null_policy, UniqueNullPolicy::Shared);
        assert!(!config.persist_on_commit);
        assert!(config.sync_on_write);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .ignore_null_values_default(true)
            .unique_null_policy(UniqueNullPolicy::Strict)
            .max_rebuild_errors(3);

        assert!(config.ignore_null_values_default);
        assert_eq!(config.unique_null_policy, UniqueNullPolicy::Strict);
        assert_eq!(config.max_rebuild_errors, 3);
    }
}
