use super::domain::DocumentTypeCode;

/// Raw codes the classifier has produced over time, mapped to canonical types.
/// Keys are lowercase with `_` separators; lookups normalize before matching.
const ALIASES: &[(&str, DocumentTypeCode)] = &[
    ("rg", DocumentTypeCode::IdentityCard),
    ("identidade", DocumentTypeCode::IdentityCard),
    ("carteira_identidade", DocumentTypeCode::IdentityCard),
    ("identity_card", DocumentTypeCode::IdentityCard),
    ("id_card", DocumentTypeCode::IdentityCard),
    ("cpf", DocumentTypeCode::TaxId),
    ("tax_id", DocumentTypeCode::TaxId),
    ("ctps", DocumentTypeCode::WorkRecord),
    ("carteira_trabalho", DocumentTypeCode::WorkRecord),
    ("carteira_de_trabalho", DocumentTypeCode::WorkRecord),
    ("work_record", DocumentTypeCode::WorkRecord),
    ("work_card", DocumentTypeCode::WorkRecord),
    ("reservist", DocumentTypeCode::Reservist),
    ("reservista", DocumentTypeCode::Reservist),
    ("certificado_reservista", DocumentTypeCode::Reservist),
    ("military_service", DocumentTypeCode::Reservist),
    ("titulo_eleitor", DocumentTypeCode::VoterRegistration),
    ("titulo_de_eleitor", DocumentTypeCode::VoterRegistration),
    ("voter_id", DocumentTypeCode::VoterRegistration),
    ("voter_registration", DocumentTypeCode::VoterRegistration),
    ("comprovante_residencia", DocumentTypeCode::ProofOfAddress),
    ("comprovante_endereco", DocumentTypeCode::ProofOfAddress),
    ("proof_of_address", DocumentTypeCode::ProofOfAddress),
    ("utility_bill", DocumentTypeCode::ProofOfAddress),
    ("certidao_nascimento", DocumentTypeCode::BirthCertificate),
    ("birth_certificate", DocumentTypeCode::BirthCertificate),
    ("certidao_casamento", DocumentTypeCode::MarriageCertificate),
    ("marriage_certificate", DocumentTypeCode::MarriageCertificate),
    ("diploma", DocumentTypeCode::EducationCertificate),
    ("certificado_escolaridade", DocumentTypeCode::EducationCertificate),
    ("historico_escolar", DocumentTypeCode::EducationCertificate),
    ("education_certificate", DocumentTypeCode::EducationCertificate),
    ("dados_bancarios", DocumentTypeCode::BankAccount),
    ("comprovante_bancario", DocumentTypeCode::BankAccount),
    ("bank_account", DocumentTypeCode::BankAccount),
    ("bank_details", DocumentTypeCode::BankAccount),
    ("pis", DocumentTypeCode::SocialSecurity),
    ("pasep", DocumentTypeCode::SocialSecurity),
    ("nis", DocumentTypeCode::SocialSecurity),
    ("social_security", DocumentTypeCode::SocialSecurity),
    ("cnh", DocumentTypeCode::DriverLicense),
    ("carteira_motorista", DocumentTypeCode::DriverLicense),
    ("driver_license", DocumentTypeCode::DriverLicense),
    ("cartao_vacina", DocumentTypeCode::VaccinationCard),
    ("carteira_vacinacao", DocumentTypeCode::VaccinationCard),
    ("vaccination_card", DocumentTypeCode::VaccinationCard),
    ("foto", DocumentTypeCode::FacePhoto),
    ("foto_rosto", DocumentTypeCode::FacePhoto),
    ("selfie", DocumentTypeCode::FacePhoto),
    ("face_photo", DocumentTypeCode::FacePhoto),
];

/// Codes meaning "none of the above"; they may carry a free-text hint after `|`.
const OTHER_SENTINELS: &[&str] = &["other", "others", "outro", "outros"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub code: DocumentTypeCode,
    /// The raw hint kept when the classifier's answer could not be mapped.
    pub note: Option<String>,
}

impl ResolvedType {
    fn canonical(code: DocumentTypeCode) -> Self {
        Self { code, note: None }
    }

    pub fn is_unrecognized(&self) -> bool {
        self.code == DocumentTypeCode::Others
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypeResolver;

impl TypeResolver {
    /// Maps a successful classifier payload onto a canonical document type.
    pub fn resolve(&self, type_code: &str, detail: Option<&str>) -> ResolvedType {
        let key = normalize(type_code);
        if !OTHER_SENTINELS.contains(&key.as_str()) {
            if let Some(code) = lookup(&key) {
                return ResolvedType::canonical(code);
            }
        }

        if let Some(code) = detail.and_then(bold_keyword).and_then(|kw| lookup(&normalize(kw))) {
            return ResolvedType::canonical(code);
        }

        let hint = match detail {
            Some(detail) if OTHER_SENTINELS.contains(&key.as_str()) => detail.to_string(),
            Some(detail) => format!("{}|{}", type_code.trim(), detail),
            None => type_code.trim().to_string(),
        };
        ResolvedType {
            code: DocumentTypeCode::Others,
            note: (!hint.is_empty()).then_some(hint),
        }
    }
}

/// Alias table first, then the canonical spelling itself (`WORK_RECORD`, `work-record`).
fn lookup(key: &str) -> Option<DocumentTypeCode> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, code)| *code)
        .or_else(|| DocumentTypeCode::from_canonical(key))
        .filter(|code| *code != DocumentTypeCode::Others)
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '-' | '.' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Extracts the first `<b>…</b>` or `**…**` marked keyword from a hint.
fn bold_keyword(hint: &str) -> Option<&str> {
    let html = delimited(hint, "<b>", "</b>")
        .or_else(|| delimited(hint, "<B>", "</B>"))
        .or_else(|| delimited(hint, "<strong>", "</strong>"));
    html.or_else(|| delimited(hint, "**", "**"))
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
}

fn delimited<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = haystack[start..].find(close)? + start;
    Some(&haystack[start..end])
}
