use serde::{Deserialize, Serialize};
use studio_types::{ParamValues, StdApiRequest, StudioError, StudioResult};

const BUILTIN_SLUG_PREFIX: &str = "airplane";

/// Identifies a builtin function. Each namespace/name pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpecification {
    pub namespace: String,
    pub name: String,
}

/// Parse a builtin task slug of the form `airplane:<namespace>_<name>`.
pub fn parse_builtin_slug(slug: &str) -> StudioResult<FunctionSpecification> {
    let unknown = || StudioError::bad_request(format!("unknown builtin task slug: {slug}"));
    let (prefix, function) = slug.split_once(':').ok_or_else(unknown)?;
    if prefix != BUILTIN_SLUG_PREFIX || function.contains(':') {
        return Err(unknown());
    }
    let (namespace, name) = function.split_once('_').ok_or_else(unknown)?;
    if namespace.is_empty() || name.is_empty() || name.contains('_') {
        return Err(unknown());
    }
    Ok(FunctionSpecification {
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

pub fn is_builtin_task_slug(slug: &str) -> bool {
    parse_builtin_slug(slug).is_ok()
}

/// Builtin request for a builtin task slug and its parameters.
pub fn request_for_slug(slug: &str, param_values: &ParamValues) -> StudioResult<StdApiRequest> {
    let function = parse_builtin_slug(slug)?;
    Ok(StdApiRequest {
        namespace: function.namespace,
        name: function.name,
        request: param_values.clone(),
    })
}

/// JSON form passed to the builtins binary as its single argument.
pub fn marshal_request(request: &StdApiRequest) -> StudioResult<String> {
    Ok(serde_json::to_string(request)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_namespace_and_name() {
        let function = parse_builtin_slug("airplane:sql_query").unwrap();
        assert_eq!(function.namespace, "sql");
        assert_eq!(function.name, "query");
        assert!(is_builtin_task_slug("airplane:rest_request"));
    }

    #[test]
    fn rejects_other_slugs() {
        for slug in ["sql_query", "other:sql_query", "airplane:sql", "airplane:sql_query_extra", "airplane:a:b_c", "airplane:_query"] {
            let error = parse_builtin_slug(slug).unwrap_err();
            assert_eq!(error.to_string(), format!("unknown builtin task slug: {slug}"));
        }
    }

    #[test]
    fn marshals_request_for_binary() {
        let params = json!({"query": "select 1"}).as_object().cloned().unwrap();
        let request = request_for_slug("airplane:sql_query", &params).unwrap();
        let encoded = marshal_request(&request).unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            decoded,
            json!({"namespace": "sql", "name": "query", "request": {"query": "select 1"}})
        );
    }
}
