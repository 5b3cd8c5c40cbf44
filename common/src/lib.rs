//! Grocery Classifier Common Library
//!
//! CLIとゲートウェイ連携で共有される型・タクソノミー・プロンプト

pub mod types;
pub mod error;
pub mod taxonomy;
pub mod dual_map;
pub mod parser;
pub mod prompts;
pub mod text;
pub mod constraints;

pub use types::{
    AdditionalCategorization, CategorizedProduct, ClassificationResult, PipelineRequest,
    PipelineResponse, Product, ProductDescriptor, ProductTypeAnswer, ProductTypeRequest,
    RawClassification, Triple, UNCATEGORIZED, UNKNOWN,
};
pub use error::{Error, Result};
pub use taxonomy::{Category, Subcategory, Taxonomy};
pub use dual_map::{DualCategoryMap, DualCategoryRule, DualTarget, RuleMatch, WILDCARD};
pub use parser::{extract_json, parse_classification_response, parse_product_type_response};
pub use prompts::{build_classification_prompt, build_product_type_prompt};
pub use constraints::CategoryConstraints;
pub use text::{clean_description, normalize_label, strip_brand_prefix};
