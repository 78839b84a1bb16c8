use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Document categories found in a manufacturing batch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageType {
    QcTestReport,
    ProductionReport,
    WorksheetPolymer,
    DeviationAcceptance,
    ProductSpec,
    Email,
    StoresRequisition,
    RmPackingIssuance,
    IssueVoucher,
    Sop,
    Bmr,
    PackingDetails,
    BmrChecklist,
    Unknown,
}

impl PageType {
    pub const ALL: [Self; 14] = [
        Self::QcTestReport,
        Self::ProductionReport,
        Self::WorksheetPolymer,
        Self::DeviationAcceptance,
        Self::ProductSpec,
        Self::Email,
        Self::StoresRequisition,
        Self::RmPackingIssuance,
        Self::IssueVoucher,
        Self::Sop,
        Self::Bmr,
        Self::PackingDetails,
        Self::BmrChecklist,
        Self::Unknown,
    ];

    /// Header title printed on pages of this type. `Unknown` has none.
    #[must_use]
    pub const fn canonical_title(self) -> Option<&'static str> {
        match self {
            Self::QcTestReport => Some("Finished Good Q.C. Test Report for Speciality Chemicals"),
            Self::ProductionReport => Some("Production Report"),
            Self::WorksheetPolymer => Some("Worksheet for Polymer Product"),
            Self::DeviationAcceptance => Some(
                "Acceptance Under Deviation for Raw Material/ Finished Products/ Packing Material",
            ),
            Self::ProductSpec => Some("View Product Specification"),
            Self::Email => Some("Rishabh Metals & Chemicals Pvt Ltd Mail"),
            Self::StoresRequisition => Some("Stores Requisition Slip Polymer Plant"),
            Self::RmPackingIssuance => Some("Raw Material & Packing Material Issuance Record"),
            Self::IssueVoucher => Some("Issue - Mtrl Voucher"),
            Self::Sop => Some("Standard Operating Procedure"),
            Self::Bmr => Some("Batch Manufacturing Record (BMR)"),
            Self::PackingDetails => Some("Packing Details"),
            Self::BmrChecklist => Some("BMR Review Checklist"),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QcTestReport => "QC_TEST_REPORT",
            Self::ProductionReport => "PRODUCTION_REPORT",
            Self::WorksheetPolymer => "WORKSHEET_POLYMER",
            Self::DeviationAcceptance => "DEVIATION_ACCEPTANCE",
            Self::ProductSpec => "PRODUCT_SPEC",
            Self::Email => "EMAIL",
            Self::StoresRequisition => "STORES_REQUISITION",
            Self::RmPackingIssuance => "RM_PACKING_ISSUANCE",
            Self::IssueVoucher => "ISSUE_VOUCHER",
            Self::Sop => "SOP",
            Self::Bmr => "BMR",
            Self::PackingDetails => "PACKING_DETAILS",
            Self::BmrChecklist => "BMR_CHECKLIST",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Types that take part in header-title matching.
    pub fn header_matched() -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(|page_type| !matches!(page_type, Self::Unknown | Self::Email))
    }
}

impl Display for PageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = ExtractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|page_type| page_type.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ExtractError::UnknownPageType(wanted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::PageType;
    use std::str::FromStr;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!(PageType::from_str("qc_test_report").ok(), Some(PageType::QcTestReport));
        assert_eq!(PageType::from_str("BMR").ok(), Some(PageType::Bmr));
        assert!(PageType::from_str("INVOICE").is_err());
    }

    #[test]
    fn header_matching_skips_email_and_unknown() {
        let matched = PageType::header_matched().collect::<Vec<_>>();
        assert_eq!(matched.len(), 12);
        assert!(!matched.contains(&PageType::Email));
        assert!(!matched.contains(&PageType::Unknown));
        assert!(matched.iter().all(|page_type| page_type.canonical_title().is_some()));
    }

    #[test]
    fn serde_uses_screaming_snake_names() {
        let json = serde_json::to_string(&PageType::RmPackingIssuance).expect("serialize");
        assert_eq!(json, "\"RM_PACKING_ISSUANCE\"");
        let parsed: PageType = serde_json::from_str("\"BMR_CHECKLIST\"").expect("deserialize");
        assert_eq!(parsed, PageType::BmrChecklist);
    }
}
