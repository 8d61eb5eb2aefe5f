//! Stable lowercase labels for the content enums (used as storage values).

macro_rules! labeled_enum {
    ($t:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($t::$variant => $label,)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $t {
            type Err = kotoba_core::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($label => Ok($t::$variant),)+
                    other => Err(kotoba_core::DomainError::validation(format!(
                        "unknown {} label: {other}",
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}
