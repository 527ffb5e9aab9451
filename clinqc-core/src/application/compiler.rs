// clinqc-core/src/application/compiler.rs
//
// Chaîne de compilation d'une règle : parse -> validation sémantique ->
// backend(s). Les deux backends sont générés depuis le même AST, jamais
// depuis deux parses séparés.

use tracing::{debug, instrument};

use crate::domain::codegen::batch::QueryPlan;
use crate::domain::codegen::realtime::Validator;
use crate::domain::codegen::{compile_batch, compile_realtime, render_sql};
use crate::domain::dsl::ast::Expr;
use crate::domain::dsl::{parse, semantic};
use crate::domain::error::{DomainError, SemanticError};
use crate::domain::rule::{Rule, RuleContext};
use crate::domain::schema::DatasetSchema;
use crate::ports::schema::FieldResolver;

/// Une règle compilée, prête à être cachée (temps réel) ou planifiée (batch).
pub struct CompiledRule {
    pub rule: Rule,
    pub ast: Expr,
    /// Présent uniquement pour les règles `real-time`.
    pub validator: Option<Validator>,
    /// Présents uniquement pour les règles `batch`.
    pub plan: Option<QueryPlan>,
    pub sql: Option<String>,
}

impl CompiledRule {
    pub fn fail_message(rule: &Rule) -> String {
        match &rule.description {
            Some(d) => d.clone(),
            None => format!("rule '{}' failed: {}", rule.id, rule.rule),
        }
    }
}

/// Compile une règle de bout en bout. Toutes les erreurs sémantiques sont
/// collectées avant de rejeter la règle, pas seulement la première.
#[instrument(skip(schema), fields(rule.id = %rule.id))]
pub fn compile(rule: &Rule, schema: &DatasetSchema) -> Result<CompiledRule, DomainError> {
    let ast = parse(&rule.rule, &rule.field)?;

    let mut errors = Vec::new();
    if schema.resolve_field(&rule.field).is_none() {
        errors.push(SemanticError::UnknownField(rule.field.clone()));
    }
    if let Err(semantic_errors) = semantic::check(&ast, rule.context, schema) {
        errors.extend(semantic_errors);
    }
    if !errors.is_empty() {
        return Err(DomainError::Semantic {
            rule_id: rule.id.clone(),
            errors,
        });
    }

    let (validator, plan, sql) = match rule.context {
        RuleContext::RealTime => {
            let message = CompiledRule::fail_message(rule);
            let validator = compile_realtime(&ast, &rule.field, &message)?;
            (Some(validator), None, None)
        }
        RuleContext::Batch => {
            let plan = compile_batch(&ast, &rule.field, schema)?;
            let sql = render_sql(&plan)?;
            debug!("Compiled batch plan for '{}': {}", rule.id, sql);
            (None, Some(plan), Some(sql))
        }
    };

    Ok(CompiledRule {
        rule: rule.clone(),
        ast,
        validator,
        plan,
        sql,
    })
}
