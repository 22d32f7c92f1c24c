//! Data classification and declarative PII field descriptors.

use serde::{Deserialize, Serialize};

use crate::key::KeyType;

/// Kind of personal or financial data a value holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Email,
    Phone,
    Name,
    Address,
    DateOfBirth,
    NationalId,
    TaxId,
    Passport,
    Iban,
    CardNumber,
    Financial,
    #[default]
    Text,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Name => "name",
            DataType::Address => "address",
            DataType::DateOfBirth => "date_of_birth",
            DataType::NationalId => "national_id",
            DataType::TaxId => "tax_id",
            DataType::Passport => "passport",
            DataType::Iban => "iban",
            DataType::CardNumber => "card_number",
            DataType::Financial => "financial",
            DataType::Text => "text",
        }
    }

    /// Government-issued identity numbers.
    pub fn is_identity_number(&self) -> bool {
        matches!(
            self,
            DataType::NationalId | DataType::TaxId | DataType::Passport
        )
    }
}

/// How sensitive a value is; drives key selection for new encryptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Internal,
    #[default]
    Confidential,
    /// Encrypted to an RSA key so that only the private-key holder can read it.
    Restricted,
}

impl Sensitivity {
    /// Key type selected for new encryptions at this sensitivity.
    pub fn key_type(&self) -> KeyType {
        match self {
            Sensitivity::Internal | Sensitivity::Confidential => KeyType::Symmetric,
            Sensitivity::Restricted => KeyType::Asymmetric,
        }
    }
}

/// Classification passed to `encrypt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub data_type: DataType,
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl Classification {
    pub fn new(data_type: DataType, sensitivity: Sensitivity) -> Self {
        Self {
            data_type,
            sensitivity,
        }
    }
}

/// Declarative description of one PII field in a record.
///
/// `field_path` is dot-separated (`"contact.email"`); a `[]` suffix on a
/// segment fans out over every element of an array (`"cards[].number"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiField {
    pub field_path: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub encryption_required: bool,
    #[serde(default)]
    pub hashing_required: bool,
    #[serde(default)]
    pub tokenization_required: bool,
}

impl PiiField {
    /// A descriptor with no transforms enabled.
    pub fn new(field_path: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_path: field_path.into(),
            data_type,
            sensitivity: Sensitivity::default(),
            encryption_required: false,
            hashing_required: false,
            tokenization_required: false,
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encryption_required = true;
        self
    }

    pub fn hashed(mut self) -> Self {
        self.hashing_required = true;
        self
    }

    pub fn tokenized(mut self) -> Self {
        self.tokenization_required = true;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// The classification used when this field is encrypted.
    pub fn classification(&self) -> Classification {
        Classification::new(self.data_type, self.sensitivity)
    }
}
