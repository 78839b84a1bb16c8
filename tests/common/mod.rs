use std::fs;
use std::path::Path;

pub const QC_TEMPLATE: &str = r#"{
    "page_type": "QC_TEST_REPORT",
    "description": "finished goods QC report",
    "extraction_template": {
        "header_fields": {
            "PRODUCT_NAME": {"label": "Product Name"},
            "BATCH_NO": {"label": "Batch No", "regex": "B\\d+"},
            "MFG_DATE": {"label": "Mfg. Date", "validation_rules": {"type": "date"}}
        },
        "test_parameters_table": [
            {"sr_no": 1, "parameter": "Appearance"},
            {"sr_no": 2, "parameter": "pH",
             "validation_rules": {"type": "number", "min_value": 6, "max_value": 8}},
            {"sr_no": 3, "parameter": "Viscosity",
             "validation_rules": {"type": "numeric_with_unit", "unit_allowed": ["CPS"]}}
        ],
        "footer_fields": {
            "CHECKED_BY": "Checked By"
        },
        "noise_markers": ["Page No"]
    }
}"#;

pub const CHECKLIST_TEMPLATE: &str = r#"{
    "page_type": "BMR_CHECKLIST",
    "extraction_template": {
        "header_fields": {"DOCUMENT_NO": "Document No"}
    }
}"#;

pub const QC_PAGE_ONE: &str = "\
# Finished Good Q.C. Test Report for Speciality Chemicals
Product Name: Resin RL-5065
Batch No: B12345
Mfg. Date: 03/01/26

| Sr. No | Parameter | Result |
|---|---|---|
| 1 | Appearance | Clear liquid |
| 2 | pH | 7.1 |
| 3 | Viscosity | 78 CPS |

Checked By: R. Sharma";

pub const QC_PAGE_TWO: &str = "\
# Finished Good Q.C. Test Report for Speciality Chemicals
Product Name: Resin RL-5065

| Sr. No | Parameter | Result |
|---|---|---|
| 1 | Appearance | Clear liquid |";

pub const CHECKLIST_PAGE: &str = "\
# BMR Review Checklist
| DOCUMENT NO. | QA/F/012 |

| Sr. | Review Points | Yes | No | NA |
|---|---|---|---|---|
| 1 | Batch record signed by production | ☑ | | |
| 2 | Deviation attached if any | | ☑ | |";

pub fn write_templates(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("qc_test_report.json"), QC_TEMPLATE)?;
    fs::write(dir.join("bmr_checklist.json"), CHECKLIST_TEMPLATE)?;
    Ok(())
}

pub fn write_pages(dir: &Path, pages: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(dir)?;
    for (index, text) in pages.iter().enumerate() {
        fs::write(dir.join(format!("page_{}.md", index + 1)), text)?;
    }
    Ok(())
}
