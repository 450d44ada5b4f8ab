// Argument completion for prompts and resource templates

use crate::error::McpError;
use crate::protocol::{Completion, CompletionArgument, Reference};
use std::collections::HashMap;

/// Candidate list used for every resource-template completion
pub const RESOURCE_ID_KEY: &str = "resourceId";

/// Answers `completion/complete` from fixed candidate lists.
///
/// Prompt arguments are looked up by argument name; resource templates always
/// complete against the `resourceId` list. Matching is a case-sensitive
/// prefix test and keeps list order.
#[derive(Debug, Clone)]
pub struct CompletionResolver {
    candidates: HashMap<String, Vec<String>>,
}

impl CompletionResolver {
    pub fn new() -> Self {
        Self::with_candidates([
            ("style", vec!["casual", "formal", "technical", "friendly"]),
            ("temperature", vec!["0", "0.5", "0.7", "1.0"]),
            (RESOURCE_ID_KEY, vec!["1", "2", "3", "4", "5"]),
        ])
    }

    pub fn with_candidates<I, K, V>(candidates: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            candidates: candidates
                .into_iter()
                .map(|(name, values)| (name.into(), values.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    pub fn resolve(
        &self,
        reference: &Reference,
        argument: &CompletionArgument,
    ) -> Result<Completion, McpError> {
        match reference.kind.as_str() {
            Reference::RESOURCE => {
                let Some(uri) = reference.uri.as_deref() else {
                    return Ok(Completion::default());
                };
                let resource_id = uri.rsplit('/').next().unwrap_or(uri);
                tracing::trace!(uri, resource_id, "Completing resource template argument");

                let values = self
                    .candidates
                    .get(RESOURCE_ID_KEY)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                Ok(prefix_matches(values, &argument.value))
            }
            Reference::PROMPT => {
                let values = self
                    .candidates
                    .get(&argument.name)
                    .ok_or_else(|| McpError::UnsupportedArgumentName(argument.name.clone()))?;
                Ok(prefix_matches(values, &argument.value))
            }
            other => Err(McpError::UnsupportedReferenceType(other.to_string())),
        }
    }
}

impl Default for CompletionResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn prefix_matches(candidates: &[String], prefix: &str) -> Completion {
    let values: Vec<String> = candidates
        .iter()
        .filter(|candidate| candidate.starts_with(prefix))
        .cloned()
        .collect();
    Completion {
        total: values.len(),
        values,
        has_more: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(name: &str, value: &str) -> CompletionArgument {
        CompletionArgument {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_prompt_prefix_is_exact_prefix_match() {
        let resolver = CompletionResolver::new();
        let completion = resolver
            .resolve(&Reference::prompt("complex_prompt"), &arg("temperature", "0"))
            .unwrap();

        assert_eq!(completion.values, vec!["0"]);
        assert_eq!(completion.total, 1);
        assert!(!completion.has_more);
    }

    #[test]
    fn test_prompt_empty_prefix_returns_all_in_order() {
        let resolver = CompletionResolver::new();
        let completion = resolver
            .resolve(&Reference::prompt("complex_prompt"), &arg("style", ""))
            .unwrap();

        assert_eq!(
            completion.values,
            vec!["casual", "formal", "technical", "friendly"]
        );
        assert_eq!(completion.total, 4);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let resolver = CompletionResolver::new();
        let completion = resolver
            .resolve(&Reference::prompt("p"), &arg("style", "F"))
            .unwrap();
        assert!(completion.values.is_empty());
        assert_eq!(completion.total, 0);

        let completion = resolver
            .resolve(&Reference::prompt("p"), &arg("style", "f"))
            .unwrap();
        assert_eq!(completion.values, vec!["formal", "friendly"]);
    }

    #[test]
    fn test_unknown_prompt_argument() {
        let resolver = CompletionResolver::new();
        let err = resolver
            .resolve(&Reference::prompt("p"), &arg("mood", ""))
            .unwrap_err();
        assert_eq!(err, McpError::UnsupportedArgumentName("mood".to_string()));
    }

    #[test]
    fn test_resource_template_uses_resource_ids() {
        let resolver = CompletionResolver::new();
        let completion = resolver
            .resolve(
                &Reference::resource("test://static/resource/{id}"),
                &arg("id", "3"),
            )
            .unwrap();
        assert_eq!(completion.values, vec!["3"]);
        assert_eq!(completion.total, 1);
    }

    #[test]
    fn test_resource_template_without_uri_is_empty() {
        let resolver = CompletionResolver::new();
        let reference = Reference {
            kind: Reference::RESOURCE.to_string(),
            uri: None,
            name: None,
        };
        let completion = resolver.resolve(&reference, &arg("id", "")).unwrap();
        assert_eq!(completion, Completion::default());
    }

    #[test]
    fn test_unknown_reference_type() {
        let resolver = CompletionResolver::new();
        let reference = Reference {
            kind: "ref/tool".to_string(),
            uri: None,
            name: Some("echo".to_string()),
        };
        let err = resolver.resolve(&reference, &arg("x", "")).unwrap_err();
        assert_eq!(err, McpError::UnsupportedReferenceType("ref/tool".to_string()));
    }
}
