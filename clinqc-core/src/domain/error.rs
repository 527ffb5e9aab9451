// clinqc-core/src/domain/error.rs

use crate::domain::dsl::token::SyntaxError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Rule '{rule_id}' failed semantic validation ({} error(s))", errors.len())]
    #[diagnostic(
        code(clinqc::domain::semantic),
        help("Fix every listed error; the rule is re-checked as a whole on the next load.")
    )]
    Semantic {
        rule_id: String,
        #[related]
        errors: Vec<SemanticError>,
    },

    // Should be rare: means the semantic validator accepted an AST the
    // backend cannot lower (grammar/codegen mismatch bug).
    #[error("Internal codegen failure: {0}")]
    #[diagnostic(code(clinqc::domain::compilation))]
    Compilation(String),

    #[error("Query plan execution failed for rule '{rule_id}': {message}")]
    #[diagnostic(code(clinqc::domain::execution))]
    Execution { rule_id: String, message: String },

    #[error("Violation #{0} not found")]
    #[diagnostic(code(clinqc::domain::violation_not_found))]
    ViolationNotFound(u64),

    #[error("Violation #{id} is already '{state}': resolution only moves forward")]
    #[diagnostic(
        code(clinqc::domain::workflow),
        help("A fresh detection in a later run creates a new violation record instead.")
    )]
    AlreadyClosed { id: u64, state: String },
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum SemanticError {
    #[error("Unknown field '{0}' (not declared in the dataset schema)")]
    #[diagnostic(code(clinqc::semantic::unknown_field))]
    UnknownField(String),

    #[error("Unknown function '{0}'")]
    #[diagnostic(code(clinqc::semantic::unknown_function))]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} argument(s), found {found}")]
    #[diagnostic(code(clinqc::semantic::arity))]
    WrongArity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Operator '{op}' is not applicable to {found} operands")]
    #[diagnostic(
        code(clinqc::semantic::type_mismatch),
        help("'between', '<' and tolerance comparisons require ordered types (number or date).")
    )]
    TypeMismatch { op: String, found: String },

    #[error("Aggregate '{0}' is only allowed in batch-context rules")]
    #[diagnostic(
        code(clinqc::semantic::aggregate_context),
        help("mean()/stddev() scan the whole dataset and cannot run during data entry.")
    )]
    AggregateInRealtime(String),

    #[error("Unknown visit '{visit}' referenced as '{field}@{visit}'")]
    #[diagnostic(code(clinqc::semantic::unknown_visit))]
    UnknownVisit { field: String, visit: String },
}
