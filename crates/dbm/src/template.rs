//! Statement templates.
//!
//! Every statement starts life as one of the skeletons below, with a tera variable for each clause.  The query builder
//! renders each clause to text (empty when the clause is unused) and this module does the substitution.  Templates are
//! rendered without autoescaping: the clause text is SQL, not HTML.
use crate::errors::*;

pub(crate) const SELECT_TEMPLATE: &str = "SELECT {{ fields }} FROM {{ table }} {{ inner_join }} {{ left_join }} \
{{ where }} {{ group }} {{ order }} {{ limit }} {{ offset }};";

pub(crate) const INSERT_TEMPLATE: &str =
    "INSERT{{ ignore }}INTO {{ table }} ({{ columns }}) VALUES ({{ values }}) {{ where }};";

pub(crate) const REPLACE_TEMPLATE: &str =
    "REPLACE{{ ignore }}INTO {{ table }} ({{ columns }}) VALUES ({{ values }});";

pub(crate) const UPDATE_TEMPLATE: &str = "UPDATE{{ ignore }} {{ table }} SET {{ assignments }} {{ where }};";

pub(crate) const DELETE_TEMPLATE: &str = "DELETE FROM {{ table }} {{ where }};";

/// Session setup run once per connection.
pub(crate) const SESSION_TEMPLATE: &str = r#"
PRAGMA foreign_keys = 1;
PRAGMA encoding = '{{ encoding }}';
"#;

/// Substitute `vars` into `template`.
///
/// Every variable the template mentions must be present; a missing one is a bug in the caller and comes back as a
/// template error.
pub(crate) fn render<'a>(
    template: &str,
    vars: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<String> {
    let mut context = tera::Context::new();
    for (k, v) in vars {
        context.insert(k, v);
    }

    Ok(tera::Tera::one_off(template, &context, false)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn substitutes_all_placeholders() {
        let out = render(
            DELETE_TEMPLATE,
            [("table", "users"), ("where", "WHERE id = 1")],
        )
        .unwrap();
        assert_eq!(out, "DELETE FROM users WHERE id = 1;");
    }

    #[test]
    fn values_are_not_reinterpreted() {
        let out = render(
            DELETE_TEMPLATE,
            [("table", "t"), ("where", "WHERE note = '{{ table }}' AND a < b")],
        )
        .unwrap();
        assert_eq!(out, "DELETE FROM t WHERE note = '{{ table }}' AND a < b;");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let res = render(DELETE_TEMPLATE, [("table", "t")]);
        assert!(matches!(res, Err(Error::Template(_))));
    }

    #[test]
    fn session_template() {
        let out = render(SESSION_TEMPLATE, [("encoding", "UTF-8")]).unwrap();
        assert!(out.contains("PRAGMA encoding = 'UTF-8';"));
        assert!(out.contains("PRAGMA foreign_keys = 1;"));
    }
}
