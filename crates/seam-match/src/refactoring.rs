//! Refactoring records produced during matching.
//!
//! Only the records the matcher itself has enough context to see are
//! synthesized here: extract/inline variable, loop↔pipeline, if↔switch,
//! merge/split conditional, assert rewrites, comment-justified grouping,
//! and the lazily derived variable rename/merge/split records. Rendering
//! and the wider refactoring catalog live downstream.

use serde::Serialize;

use seam_core::FragmentId;

use crate::mapping::MappingId;

/// A higher-level named change pattern synthesized from mappings and
/// replacements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Refactoring {
    /// A new variable in "after" holds an expression previously inlined.
    ExtractVariable {
        name: String,
        /// Declaration leaf on the "after" side.
        declaration: FragmentId,
        /// Mappings whose after-side references the extracted variable.
        references: Vec<MappingId>,
    },
    /// A "before" variable was eliminated and its initializer inlined.
    InlineVariable {
        name: String,
        /// Declaration leaf on the "before" side.
        declaration: FragmentId,
        /// Mappings whose before-side referenced the inlined variable.
        references: Vec<MappingId>,
    },
    /// A loop was rewritten as a chained collection pipeline.
    ReplaceLoopWithPipeline {
        loop_fragment: FragmentId,
        pipeline_fragment: FragmentId,
        /// Every statement absorbed on the "before" side.
        absorbed_before: Vec<FragmentId>,
        /// Every statement absorbed on the "after" side.
        absorbed_after: Vec<FragmentId>,
    },
    /// A chained collection pipeline was rewritten as a loop.
    ReplacePipelineWithLoop {
        pipeline_fragment: FragmentId,
        loop_fragment: FragmentId,
        absorbed_before: Vec<FragmentId>,
        absorbed_after: Vec<FragmentId>,
    },
    /// A switch was rewritten as an if/else-if chain.
    ReplaceSwitchWithIf {
        switch_fragment: FragmentId,
        if_fragment: FragmentId,
        /// Case labels found embedded in the if condition.
        case_labels: Vec<String>,
    },
    /// An if/else-if chain was rewritten as a switch.
    ReplaceIfWithSwitch {
        if_fragment: FragmentId,
        switch_fragment: FragmentId,
        case_labels: Vec<String>,
    },
    /// One conditional was split into several.
    SplitConditional {
        before_condition: String,
        after_conditions: Vec<String>,
        mappings: Vec<MappingId>,
    },
    /// Several conditionals were merged into one.
    MergeConditional {
        before_conditions: Vec<String>,
        after_condition: String,
        mappings: Vec<MappingId>,
    },
    /// An assertion call was rewritten between assert styles.
    AssertRewrite {
        before_call: String,
        after_call: String,
        mapping: MappingId,
    },
    /// A mapping accepted on the strength of identical embedded comments.
    CommentGroupedMapping {
        comment: String,
        mapping: MappingId,
    },
    /// Derived: a variable consistently renamed across the body.
    RenameVariable {
        before_name: String,
        after_name: String,
        mappings: Vec<MappingId>,
    },
    /// Derived: several variables merged into one.
    MergeVariables {
        before_names: Vec<String>,
        after_name: String,
        mappings: Vec<MappingId>,
    },
    /// Derived: one variable split into several.
    SplitVariable {
        before_name: String,
        after_names: Vec<String>,
        mappings: Vec<MappingId>,
    },
}

impl Refactoring {
    /// Short kind name for logs and tests.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Refactoring::ExtractVariable { .. } => "extract_variable",
            Refactoring::InlineVariable { .. } => "inline_variable",
            Refactoring::ReplaceLoopWithPipeline { .. } => "replace_loop_with_pipeline",
            Refactoring::ReplacePipelineWithLoop { .. } => "replace_pipeline_with_loop",
            Refactoring::ReplaceSwitchWithIf { .. } => "replace_switch_with_if",
            Refactoring::ReplaceIfWithSwitch { .. } => "replace_if_with_switch",
            Refactoring::SplitConditional { .. } => "split_conditional",
            Refactoring::MergeConditional { .. } => "merge_conditional",
            Refactoring::AssertRewrite { .. } => "assert_rewrite",
            Refactoring::CommentGroupedMapping { .. } => "comment_grouped_mapping",
            Refactoring::RenameVariable { .. } => "rename_variable",
            Refactoring::MergeVariables { .. } => "merge_variables",
            Refactoring::SplitVariable { .. } => "split_variable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_serialize_with_type_tag() {
        let r = Refactoring::RenameVariable {
            before_name: "count".into(),
            after_name: "total".into(),
            mappings: vec![MappingId(0)],
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"type\":\"RenameVariable\""));
        assert_eq!(r.kind_name(), "rename_variable");
    }
}
