//! Canonical node and link identifiers.
//!
//! The network format the Engine consumes carries identifiers whose type is
//! ambiguous in practice: the same junction may surface as `"1359"` in one
//! table and `"1359.0"` in another. All identifiers are normalized exactly
//! once, at the ingestion boundary, under a configured [`IdPolicy`] — nothing
//! downstream reconciles id spellings.

/// How raw engine identifiers are canonicalized.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum IdPolicy {
    /// Identifiers are integers that may arrive with a float suffix
    /// (`"1359.0"` becomes `"1359"`). Non-numeric ids pass through unchanged.
    #[default]
    Integer,
    /// Identifiers are opaque strings, kept verbatim apart from trimming.
    Opaque,
}

impl IdPolicy {
    pub fn normalize(self, raw: &str) -> String {
        let raw = raw.trim();
        match self {
            IdPolicy::Opaque => raw.to_owned(),
            // Strip a literal all-zeros fraction from a plain decimal
            // spelling, and nothing else. Going through a float would
            // rewrite exotic spellings ("1e3") and lose ids past the
            // integer range.
            IdPolicy::Integer => match raw.split_once('.') {
                Some((whole, frac))
                    if !whole.is_empty()
                        && whole.bytes().all(|b| b.is_ascii_digit())
                        && !frac.is_empty()
                        && frac.bytes().all(|b| b == b'0') =>
                {
                    whole.to_owned()
                }
                _ => raw.to_owned(),
            },
        }
    }
}

macro_rules! identifier {
    ($name: ident) => {
        /// A canonicalized identifier. Construct via [`Self::new`] so every
        /// instance has passed through the same [`IdPolicy`].
        #[derive(
            Debug,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Display,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Normalizes `raw` under `policy` and wraps the result.
            pub fn new(raw: &str, policy: IdPolicy) -> Self {
                Self(policy.normalize(raw))
            }

            /// Returns the canonical string representation.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

identifier!(NodeId);
identifier!(LinkId);
