//! Provider/model resolution for a chat turn
//!
//! Picks the `(provider, model)` pair a turn is routed through. Sources are
//! consulted in order and the first one that names a model wins:
//!
//! 1. the active conversation's stored pair
//! 2. the assistant's preferred model
//! 3. the global default model
//! 4. the first known model
//!
//! A model id found in the known-model catalog always takes the catalog's
//! provider, since models can be re-provisioned under a different backend.

use thiserror::Error;

use crate::conversation::{Assistant, GlobalSettings, ModelInfo};

use super::ProviderKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no model available, add or select a model first")]
    NoModelAvailable,
}

/// Where the resolved pair came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Conversation,
    Assistant,
    Settings,
    Catalog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub provider: ProviderKind,
    pub model: String,
    pub source: ResolvedFrom,
}

/// Everything the resolver looks at
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub conversation_provider: Option<&'a ProviderKind>,
    pub conversation_model: Option<&'a str>,
    pub assistant: Option<&'a Assistant>,
    pub settings: &'a GlobalSettings,
    pub known_models: &'a [ModelInfo],
}

pub fn resolve(input: ResolveInput<'_>) -> Result<Resolved, ResolveError> {
    let lookup = |model: &str| input.known_models.iter().find(|m| m.model_id == model);
    let fallback_provider = || {
        input
            .assistant
            .and_then(|a| a.provider.clone())
            .or_else(|| input.settings.default_provider.clone())
            .unwrap_or_default()
    };

    if let Some(model) = non_empty(input.conversation_model) {
        let provider = match lookup(model) {
            Some(found) => found.provider.clone(),
            None => input
                .conversation_provider
                .cloned()
                .unwrap_or_else(fallback_provider),
        };
        return Ok(Resolved {
            provider,
            model: model.to_string(),
            source: ResolvedFrom::Conversation,
        });
    }

    let preferred = [
        (
            non_empty(input.assistant.and_then(|a| a.model.as_deref())),
            ResolvedFrom::Assistant,
        ),
        (
            non_empty(input.settings.default_model.as_deref()),
            ResolvedFrom::Settings,
        ),
    ];
    for (model, source) in preferred {
        if let Some(model) = model {
            let provider = lookup(model)
                .map(|found| found.provider.clone())
                .unwrap_or_else(fallback_provider);
            return Ok(Resolved {
                provider,
                model: model.to_string(),
                source,
            });
        }
    }

    input
        .known_models
        .first()
        .map(|first| Resolved {
            provider: first.provider.clone(),
            model: first.model_id.clone(),
            source: ResolvedFrom::Catalog,
        })
        .ok_or(ResolveError::NoModelAvailable)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
