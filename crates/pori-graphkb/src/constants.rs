// GraphKB constants: endpoints, vocabulary names and query return properties

pub const DEFAULT_URL: &str = "https://graphkb-api.bcgsc.ca/api";
pub const GRAPHKB_GUI: &str = "https://graphkb.bcgsc.ca";
pub const DEFAULT_LIMIT: usize = 1000;

/// Tokens are refreshed when they expire within this many seconds
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 10;

pub mod api_path {
    pub const TOKEN: &str = "token";
    pub const QUERY: &str = "query";
    pub const PARSE: &str = "parse";
}

// Sources
pub const ONCOKB_SOURCE_NAME: &str = "oncokb";
pub const TSO500_SOURCE_NAME: &str = "tso500";
pub const PREFERRED_GENE_SOURCE: &str = "entrez gene";
pub const PHARMACOGENOMIC_SOURCE_EXCLUDE_LIST: &[&str] = &["cancer genome interpreter", "civic"];

// Relevance vocabulary
pub const ONCOGENE: &str = "oncogenic";
pub const TUMOUR_SUPPRESSIVE: &str = "tumour suppressive";
pub const CANCER_GENE: &str = "cancer gene";
pub const FUSION_NAMES: &[&str] = &["structural variant", "fusion"];
pub const BASE_THERAPEUTIC_TERMS: &[&str] = &["therapeutic efficacy", "eligibility"];
pub const FAILED_REVIEW_STATUS: &str = "failed";

/// Relevance categories and the vocabulary terms rooted under each, in priority order
pub const RELEVANCE_BASE_TERMS: &[(&str, &[&str])] = &[
    ("therapeutic", BASE_THERAPEUTIC_TERMS),
    ("diagnostic", &["diagnostic indicator"]),
    ("prognostic", &["prognostic indicator"]),
    ("biological", &["functional effect", "tumourigenesis", "predisposing"]),
    ("cancer predisposition", &["pathogenic"]),
    ("pharmacogenomic", &["metabolism", "toxicity", "dosage"]),
];

/// Accepted `kbCategory` values for copy variants
pub mod copy_category {
    pub const AMP: &str = "amplification";
    pub const ANY_GAIN: &str = "copy gain";
    pub const ANY_LOSS: &str = "copy loss";
    pub const DEEP: &str = "deep deletion";
    pub const GAIN: &str = "low level copy gain";
    pub const LOSS: &str = "shallow deletion";

    pub const ALL: &[&str] = &[AMP, ANY_GAIN, ANY_LOSS, DEEP, GAIN, LOSS];
}

/// Accepted `kbCategory` values for expression variants
pub mod expression_category {
    pub const UP: &str = "increased expression";
    pub const DOWN: &str = "reduced expression";

    pub const ALL: &[&str] = &[UP, DOWN];
}

/// Amino acid codes that mean "unknown"
pub const AMBIGUOUS_AA: &[&str] = &["x", "?", "X"];

pub const SIMILARITY_EDGES: &[&str] = &["AliasOf", "CrossReferenceOf", "DeprecatedBy"];

// Query return properties

pub const BASE_RETURN_PROPERTIES: &[&str] = &["@rid", "@class"];

pub const GENERIC_RETURN_PROPERTIES: &[&str] = &[
    "@rid",
    "@class",
    "name",
    "sourceId",
    "sourceIdVersion",
    "source.name",
    "source.@rid",
    "displayName",
    "deprecated",
];

pub const GENE_RETURN_PROPERTIES: &[&str] = &[
    "@rid",
    "@class",
    "name",
    "sourceId",
    "sourceIdVersion",
    "source.name",
    "source.@rid",
    "source.sort",
    "displayName",
    "deprecated",
    "alias",
    "biotype",
    "dependency",
];

pub const VARIANT_RETURN_PROPERTIES: &[&str] = &[
    "@rid",
    "@class",
    "displayName",
    "type.@rid",
    "type.name",
    "reference1.@rid",
    "reference1.displayName",
    "reference1.name",
    "reference1.biotype",
    "reference2.@rid",
    "reference2.displayName",
    "reference2.name",
    "reference2.biotype",
];

pub const POS_VARIANT_RETURN_PROPERTIES: &[&str] = &[
    "@rid",
    "@class",
    "displayName",
    "type.@rid",
    "type.name",
    "reference1.@rid",
    "reference1.displayName",
    "reference1.name",
    "reference1.biotype",
    "reference2.@rid",
    "reference2.displayName",
    "reference2.name",
    "reference2.biotype",
    "break1Start",
    "break1End",
    "break2Start",
    "break2End",
    "break1Repr",
    "break2Repr",
    "refSeq",
    "untemplatedSeq",
    "untemplatedSeqSize",
    "truncation",
    "assembly",
];

/// `<prefix>.<property>` for each property
pub fn prefixed(prefix: &str, properties: &[&str]) -> Vec<String> {
    properties
        .iter()
        .map(|p| format!("{}.{}", prefix, p))
        .collect()
}

/// Properties needed to build kbMatches from a statement
pub fn statement_return_properties() -> Vec<String> {
    let mut props: Vec<String> = [
        "@rid",
        "@class",
        "displayNameTemplate",
        "sourceId",
        "source.name",
        "source.displayName",
        "reviewStatus",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    props.extend(prefixed("conditions", GENERIC_RETURN_PROPERTIES));
    props.extend(prefixed("conditions", &["reference1", "reference2"]));
    props.extend(prefixed("subject", GENERIC_RETURN_PROPERTIES));
    props.extend(prefixed("evidence", GENERIC_RETURN_PROPERTIES));
    props.extend(prefixed("relevance", GENERIC_RETURN_PROPERTIES));
    props.extend(prefixed("evidenceLevel", GENERIC_RETURN_PROPERTIES));
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed() {
        assert_eq!(
            prefixed("subject", &["@rid", "name"]),
            vec!["subject.@rid".to_string(), "subject.name".to_string()]
        );
    }

    #[test]
    fn test_statement_return_properties() {
        let props = statement_return_properties();
        assert!(props.contains(&"conditions.@class".to_string()));
        assert!(props.contains(&"relevance.name".to_string()));
        assert!(props.contains(&"reviewStatus".to_string()));
    }

    #[test]
    fn test_relevance_order() {
        let names: Vec<&str> = RELEVANCE_BASE_TERMS.iter().map(|(n, _)| *n).collect();
        assert_eq!(names[0], "therapeutic");
        assert_eq!(names[names.len() - 1], "pharmacogenomic");
    }
}
