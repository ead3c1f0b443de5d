use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::domain::{Applicability, DocumentType, DocumentTypeCode};

/// Document type reference data. Created by configuration, never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentCatalog {
    types: BTreeMap<DocumentTypeCode, DocumentType>,
}

impl DocumentCatalog {
    pub fn new(types: impl IntoIterator<Item = DocumentType>) -> Self {
        Self {
            types: types
                .into_iter()
                .map(|document_type| (document_type.code, document_type))
                .collect(),
        }
    }

    /// The default onboarding checklist.
    pub fn standard() -> Self {
        use Applicability::{Both, Employee};
        use DocumentTypeCode::*;

        let entry = |code, name: &str, mandatory, applicability| DocumentType {
            code,
            name: name.to_string(),
            mandatory,
            applicability,
            active: true,
        };

        Self::new([
            entry(IdentityCard, "Identity card", true, Both),
            entry(TaxId, "Taxpayer registration", true, Both),
            entry(WorkRecord, "Work record booklet", true, Employee),
            entry(Reservist, "Military service certificate", false, Employee),
            entry(VoterRegistration, "Voter registration", true, Employee),
            entry(ProofOfAddress, "Proof of address", true, Both),
            entry(BirthCertificate, "Birth certificate", false, Both),
            entry(MarriageCertificate, "Marriage certificate", false, Both),
            entry(EducationCertificate, "Education certificate", false, Employee),
            entry(BankAccount, "Bank account details", true, Both),
            entry(SocialSecurity, "Social integration number", true, Employee),
            entry(DriverLicense, "Driver license", false, Both),
            entry(VaccinationCard, "Vaccination card", false, Employee),
            entry(FacePhoto, "Face photo", true, Both),
            entry(Others, "Other documents", false, Both),
        ])
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Reads `code,name,mandatory,applicability,active` rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut types = Vec::new();

        for row in csv_reader.deserialize::<CatalogRow>() {
            let row = row?;
            let code = DocumentTypeCode::from_canonical(&row.code)
                .ok_or_else(|| CatalogError::UnknownCode(row.code.clone()))?;
            if types.iter().any(|existing: &DocumentType| existing.code == code) {
                return Err(CatalogError::DuplicateCode(code));
            }
            types.push(DocumentType {
                code,
                name: row.name,
                mandatory: row.mandatory,
                applicability: row.applicability,
                active: row.active.unwrap_or(true),
            });
        }

        Ok(Self::new(types))
    }

    pub fn get(&self, code: DocumentTypeCode) -> Option<&DocumentType> {
        self.types.get(&code)
    }

    pub fn types(&self) -> impl Iterator<Item = &DocumentType> {
        self.types.values()
    }
}

impl Default for DocumentCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    code: String,
    name: String,
    mandatory: bool,
    applicability: Applicability,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read document catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid document catalog CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("unknown document type code '{0}'")]
    UnknownCode(String),
    #[error("document type {0} listed twice")]
    DuplicateCode(DocumentTypeCode),
}
