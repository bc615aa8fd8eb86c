//! Macro for defining validated string identifiers.
//!
//! Tables, KPIs and ingestion batches are addressed by short names that end
//! up in file paths, manifest keys and fingerprints, so each is wrapped in its
//! own type with a shared validation rule.

/// Define a validated string identifier.
///
/// The generated type rejects values for which `$check` returns an error
/// message, both at construction and during deserialization.
macro_rules! define_name {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident => $check:path;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        #[serde(transparent)]
        $vis struct $Name(String);

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $Name::parse(s).map_err(serde::de::Error::custom)
            }
        }

        impl $Name {
            /// Create a new name, panicking if it fails validation.
            ///
            /// Prefer [`parse`](Self::parse) for untrusted input.
            pub fn new(name: impl Into<String>) -> Self {
                match Self::parse(name) {
                    Ok(n) => n,
                    Err(msg) => panic!("{msg}"),
                }
            }

            /// Validate and wrap a name.
            pub fn parse(name: impl Into<String>) -> Result<Self, String> {
                let s = name.into();
                $check(&s).map_err(|reason| {
                    format!(concat!(stringify!($Name), " '{}' is invalid: {}"), s, reason)
                })?;
                Ok(Self(s))
            }

            /// Return the underlying name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $Name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $Name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $Name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

pub(crate) use define_name;
