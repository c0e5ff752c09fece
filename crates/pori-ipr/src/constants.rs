// Constants for report creation and upload

pub const DEFAULT_URL: &str = "https://iprstaging-api.bcgsc.ca/api";

/// IPR API endpoints
pub mod api_path {
    pub const REPORTS: &str = "reports";
    pub const REPORTS_ASYNC: &str = "reports-async";
    pub const PROJECT: &str = "project";
    pub const SPEC: &str = "spec.json";
}

/// Images sent per multipart request
pub const IMAGE_BATCH_SIZE: usize = 4;

/// Async upload states that end polling
pub const ASYNC_DONE_STATES: &[&str] = &["ready", "active", "completed"];
pub const ASYNC_FAILED_STATE: &str = "failed";

/// Relevance categories that only apply to germline variants
pub const GERMLINE_BASE_TERMS: &[&str] = &["pharmacogenomic", "cancer predisposition"];

pub const VARIANT_CLASSES: &[&str] = &[
    "Variant",
    "CategoryVariant",
    "PositionalVariant",
    "CatalogueVariant",
];

/// Combined indel and SNV burden at or above which TMB is matched
pub const TMB_HIGH: f64 = 10.0;
pub const TMB_HIGH_CATEGORY: &str = "high mutation burden";
pub const MSI_DEFAULT_CATEGORY: &str = "microsatellite instability";

/// Copy categories that are matched against GraphKB
pub const REPORTED_COPY_VARIANTS: &[&str] = &["amplification", "deep deletion"];

/// Evidence levels (by source) that mark an approved therapy
pub const APPROVED_EVIDENCE_LEVELS: &[(&str, &[&str])] = &[
    ("oncokb", &["1", "r1"]),
    ("profyle", &["t1"]),
    (
        "cancer genome interpreter",
        &[
            "cpic guideline",
            "european leukemianet guidelines",
            "fda guidelines",
            "nccn guidelines",
            "nccn/cap guidelines",
        ],
    ),
];
pub const IPR_SOURCE_NAME: &str = "ipr";
pub const IPR_APPROVED_LEVEL: &str = "IPR-A";

pub const DEFAULT_EXCLUDED_VARIANT_TYPES: &[&str] = &["wildtype"];

/// Key alteration sections by variantType
pub const VARIANT_COUNT_SECTIONS: &[(&str, &str)] = &[
    ("mut", "smallMutations"),
    ("cnv", "CNVs"),
    ("sv", "SVs"),
    ("exp", "expressionOutliers"),
];

/// Report sections holding variant rows
pub const VARIANT_SECTIONS: &[&str] = &[
    "expressionVariants",
    "smallMutations",
    "copyVariants",
    "structuralVariants",
    "probeResults",
    "signatureVariants",
];

pub const ENTREZ_GENE_URL: &str = "https://www.ncbi.nlm.nih.gov/gene";
pub const OTHER_DISEASES: &str = "other disease types";
pub const COMMENTS_HEADER: &str = "<h3>The comments below were automatically generated from matches to GraphKB and have not been manually reviewed</h3>";
