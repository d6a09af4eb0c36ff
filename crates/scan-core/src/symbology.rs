use std::fmt;

use rxing::BarcodeFormat;
use serde::{Deserialize, Serialize};

/// Barcode encoding standards the scanner recognises. Serialized under the
/// same labels the overlay draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    #[serde(rename = "EAN-8")]
    Ean8,
    #[serde(rename = "EAN-13")]
    Ean13,
    #[serde(rename = "UPC-A")]
    UpcA,
    #[serde(rename = "UPC-E")]
    UpcE,
    #[serde(rename = "CODE-39")]
    Code39,
    #[serde(rename = "CODE-93")]
    Code93,
    #[serde(rename = "CODE-128")]
    Code128,
    #[serde(rename = "ITF")]
    Itf,
    #[serde(rename = "CODABAR")]
    Codabar,
    #[serde(rename = "QR")]
    QrCode,
    #[serde(rename = "DATAMATRIX")]
    DataMatrix,
    #[serde(rename = "PDF417")]
    Pdf417,
    #[serde(rename = "AZTEC")]
    Aztec,
    #[serde(rename = "OTHER")]
    Other,
}

impl Symbology {
    /// Short display label used in overlays and logs.
    pub fn label(self) -> &'static str {
        match self {
            Symbology::Ean8 => "EAN-8",
            Symbology::Ean13 => "EAN-13",
            Symbology::UpcA => "UPC-A",
            Symbology::UpcE => "UPC-E",
            Symbology::Code39 => "CODE-39",
            Symbology::Code93 => "CODE-93",
            Symbology::Code128 => "CODE-128",
            Symbology::Itf => "ITF",
            Symbology::Codabar => "CODABAR",
            Symbology::QrCode => "QR",
            Symbology::DataMatrix => "DATAMATRIX",
            Symbology::Pdf417 => "PDF417",
            Symbology::Aztec => "AZTEC",
            Symbology::Other => "OTHER",
        }
    }

    /// True for linear symbologies, which only report the endpoints of the
    /// scan line instead of four corners.
    pub fn is_linear(self) -> bool {
        !matches!(
            self,
            Symbology::QrCode
                | Symbology::DataMatrix
                | Symbology::Pdf417
                | Symbology::Aztec
                | Symbology::Other
        )
    }
}

impl From<&BarcodeFormat> for Symbology {
    fn from(format: &BarcodeFormat) -> Self {
        match format {
            BarcodeFormat::EAN_8 => Symbology::Ean8,
            BarcodeFormat::EAN_13 => Symbology::Ean13,
            BarcodeFormat::UPC_A => Symbology::UpcA,
            BarcodeFormat::UPC_E => Symbology::UpcE,
            BarcodeFormat::CODE_39 => Symbology::Code39,
            BarcodeFormat::CODE_93 => Symbology::Code93,
            BarcodeFormat::CODE_128 => Symbology::Code128,
            BarcodeFormat::ITF => Symbology::Itf,
            BarcodeFormat::CODABAR => Symbology::Codabar,
            BarcodeFormat::QR_CODE => Symbology::QrCode,
            BarcodeFormat::DATA_MATRIX => Symbology::DataMatrix,
            BarcodeFormat::PDF_417 => Symbology::Pdf417,
            BarcodeFormat::AZTEC => Symbology::Aztec,
            _ => Symbology::Other,
        }
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(Symbology::Ean13.label(), "EAN-13");
        assert_eq!(Symbology::QrCode.label(), "QR");
    }

    #[test]
    fn linear_classification() {
        assert!(Symbology::Ean13.is_linear());
        assert!(Symbology::Code128.is_linear());
        assert!(!Symbology::QrCode.is_linear());
        assert!(!Symbology::DataMatrix.is_linear());
    }

    #[test]
    fn maps_rxing_formats() {
        assert_eq!(Symbology::from(&BarcodeFormat::EAN_13), Symbology::Ean13);
        assert_eq!(Symbology::from(&BarcodeFormat::QR_CODE), Symbology::QrCode);
        assert_eq!(Symbology::from(&BarcodeFormat::MAXICODE), Symbology::Other);
    }

    #[test]
    fn serializes_under_display_labels() {
        assert_eq!(
            serde_json::to_string(&Symbology::Ean13).unwrap(),
            "\"EAN-13\""
        );
        let back: Symbology = serde_json::from_str("\"EAN-13\"").unwrap();
        assert_eq!(back, Symbology::Ean13);
    }
}
