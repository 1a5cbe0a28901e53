use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a stored or user-supplied label does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {field} value: {value}")]
pub struct UnknownVariant {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(UnknownVariant {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(RecognitionMethod {
    Barcode => "Barcode",
    LocalOcr => "LocalOCR",
    RemoteVision => "RemoteVision",
    Manual => "Manual",
});

str_enum!(CascadeStage {
    Barcode => "barcode",
    LocalOcr => "local_ocr",
    RemoteVision => "remote_vision",
});

impl CascadeStage {
    /// Stages in the order the cascade attempts them: cheapest first.
    pub const ORDER: [CascadeStage; 3] = [
        CascadeStage::Barcode,
        CascadeStage::LocalOcr,
        CascadeStage::RemoteVision,
    ];

    /// The method recorded on a note resolved by this stage.
    pub fn method(&self) -> RecognitionMethod {
        match self {
            Self::Barcode => RecognitionMethod::Barcode,
            Self::LocalOcr => RecognitionMethod::LocalOcr,
            Self::RemoteVision => RecognitionMethod::RemoteVision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn recognition_method_round_trips_labels() {
        for method in [
            RecognitionMethod::Barcode,
            RecognitionMethod::LocalOcr,
            RecognitionMethod::RemoteVision,
            RecognitionMethod::Manual,
        ] {
            assert_eq!(RecognitionMethod::from_str(method.as_str()).unwrap(), method);
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = RecognitionMethod::from_str("Failure").unwrap_err();
        assert_eq!(err.field, "RecognitionMethod");
        assert_eq!(err.value, "Failure");
    }

    #[test]
    fn stage_order_is_cheapest_first() {
        assert_eq!(
            CascadeStage::ORDER,
            [
                CascadeStage::Barcode,
                CascadeStage::LocalOcr,
                CascadeStage::RemoteVision
            ]
        );
    }

    #[test]
    fn stage_maps_to_method() {
        assert_eq!(CascadeStage::Barcode.method(), RecognitionMethod::Barcode);
        assert_eq!(CascadeStage::LocalOcr.method(), RecognitionMethod::LocalOcr);
        assert_eq!(
            CascadeStage::RemoteVision.method(),
            RecognitionMethod::RemoteVision
        );
    }

    #[test]
    fn method_display_matches_label() {
        assert_eq!(RecognitionMethod::LocalOcr.to_string(), "LocalOCR");
    }

    #[test]
    fn serde_uses_the_same_labels() {
        let json = serde_json::to_string(&RecognitionMethod::LocalOcr).unwrap();
        assert_eq!(json, "\"LocalOCR\"");
        let stage: CascadeStage = serde_json::from_str("\"remote_vision\"").unwrap();
        assert_eq!(stage, CascadeStage::RemoteVision);
    }
}
