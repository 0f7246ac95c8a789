//! Human-readable rendering of a query's completed AST, used in denial diagnostics
//! and debug logging. The output mimics the builder chain: `message.where(authorId, u1)`.

use serde_json::Value;

use super::{Condition, Direction, Operand, Operator, Query, QueryAst};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrettyMode { Full, Minimal }

pub fn pretty_format_query(query: &Query, mode: PrettyMode) -> String {
    let ast = query.complete_ast();
    match mode {
        PrettyMode::Full => format_full(&ast),
        PrettyMode::Minimal => format_minimal(&ast),
    }
}

fn format_full(ast: &QueryAst) -> String {
    let mut out = ast.table.clone();
    let mut chained = false;
    let mut push = |out: &mut String, clause: String| {
        if chained {
            out.push_str("\n  ");
        }
        out.push_str(&clause);
        chained = true;
    };
    if let Some(w) = &ast.where_ {
        let clause = format_where(w);
        if !clause.is_empty() { push(&mut out, clause); }
    }
    if let Some(limit) = ast.limit {
        push(&mut out, format!(".limit({})", limit));
    }
    if !ast.order_by.is_empty() {
        let parts: Vec<String> = ast
            .order_by
            .iter()
            .map(|(c, d)| format!("{}, {}", c, match d { Direction::Asc => "asc", Direction::Desc => "desc" }))
            .collect();
        push(&mut out, format!(".orderBy({})", parts.join(", ")));
    }
    out
}

fn format_minimal(ast: &QueryAst) -> String {
    let mut out = ast.table.clone();
    if let Some(w) = &ast.where_ {
        out.push_str(&format_where(w).replacen(".where(", "(", 1));
    }
    out
}

fn operand_text(o: &Operand) -> String {
    match o {
        Operand::Column { name } => name.clone(),
        Operand::Literal { value } => value_text(value),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_where(cond: &Condition) -> String {
    match cond {
        Condition::Simple { op, left, right } => {
            let column = operand_text(left);
            let value = operand_text(right);
            let scalar = matches!(right, Operand::Literal { value: Value::String(_) | Value::Number(_) });
            if column == "id" && *op == Operator::Eq && scalar {
                return format!("({})", value);
            }
            if *op == Operator::Eq {
                return format!(".where({}, {})", column, value);
            }
            format!(".where({}, {}, {})", column, op, value)
        }
        Condition::And { conditions } => join_chain(conditions, "and"),
        Condition::Or { conditions } => join_chain(conditions, "or"),
    }
}

fn join_chain(conditions: &[Condition], word: &str) -> String {
    let mut out = String::new();
    for (i, c) in conditions.iter().enumerate() {
        let part = format_where(c);
        if i == 0 {
            out.push_str(&part);
        } else {
            // drop the leading dot of the nested clause
            let trimmed = part.strip_prefix('.').unwrap_or(&part);
            out.push_str(&format!(".{}({})", word, trimmed));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Query { Query::new("message", vec!["id".into()]) }

    #[test]
    fn full_mode_chains_where_limit_and_order() {
        let q = base().where_(|eb| eb.and([eb.cmp("authorId", "u1"), eb.cmp("id", "m1")])).one();
        let text = pretty_format_query(&q, PrettyMode::Full);
        assert_eq!(text, "message.where(authorId, u1).and((m1))\n  .limit(1)\n  .orderBy(id, asc)");
    }

    #[test]
    fn id_equality_is_shortened() {
        let q = base().where_(|eb| eb.cmp("id", "m1"));
        assert_eq!(pretty_format_query(&q, PrettyMode::Minimal), "message(m1)");
    }

    #[test]
    fn non_equality_operators_are_spelled_out() {
        let q = base().where_(|eb| eb.cmp_op("createdAt", Operator::Gt, 5));
        assert_eq!(pretty_format_query(&q, PrettyMode::Minimal), "message(createdAt, >, 5)");
    }
}
