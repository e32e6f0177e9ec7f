//! Capability advertisement
//!
//! Capabilities are derived from the handler registry so a feature is only
//! advertised when something will answer for it. Features without a handler
//! are reported as `false` or left out entirely.

use crate::lsp::registry::HandlerRegistry;
use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
    Notification as _,
};
use lsp_types::request::{
    DocumentHighlightRequest, DocumentSymbolRequest, FoldingRangeRequest, Formatting,
    GotoDefinition, GotoImplementation, GotoTypeDefinition, HoverRequest, RangeFormatting,
    References, Rename, Request as _, SemanticTokensFullRequest, SemanticTokensRangeRequest,
    WorkspaceSymbolRequest,
};
use lsp_types::{
    FoldingRangeProviderCapability, HoverProviderCapability, ImplementationProviderCapability,
    OneOf, SaveOptions, SemanticTokenModifier, SemanticTokenType, SemanticTokensFullOptions,
    SemanticTokensLegend, SemanticTokensOptions, SemanticTokensServerCapabilities,
    ServerCapabilities, TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
    TextDocumentSyncSaveOptions, TypeDefinitionProviderCapability,
};

/// Token types reported in the semantic tokens legend, in index order
pub fn semantic_token_types() -> Vec<SemanticTokenType> {
    vec![
        SemanticTokenType::CLASS,
        SemanticTokenType::VARIABLE,
        SemanticTokenType::ENUM,
        SemanticTokenType::COMMENT,
        SemanticTokenType::STRING,
        SemanticTokenType::KEYWORD,
    ]
}

/// Token modifiers reported in the semantic tokens legend, in bit order
pub fn semantic_token_modifiers() -> Vec<SemanticTokenModifier> {
    vec![
        SemanticTokenModifier::DECLARATION,
        SemanticTokenModifier::DOCUMENTATION,
    ]
}

/// Compute the capabilities to return from `initialize`
pub fn server_capabilities(registry: &HandlerRegistry) -> ServerCapabilities {
    let request = |method: &str| registry.handles_request(method);

    ServerCapabilities {
        text_document_sync: text_document_sync(registry),
        hover_provider: Some(HoverProviderCapability::Simple(request(HoverRequest::METHOD))),
        definition_provider: flag(registry, GotoDefinition::METHOD),
        type_definition_provider: Some(TypeDefinitionProviderCapability::Simple(request(
            GotoTypeDefinition::METHOD,
        ))),
        implementation_provider: Some(ImplementationProviderCapability::Simple(request(
            GotoImplementation::METHOD,
        ))),
        references_provider: flag(registry, References::METHOD),
        document_highlight_provider: flag(registry, DocumentHighlightRequest::METHOD),
        document_symbol_provider: flag(registry, DocumentSymbolRequest::METHOD),
        document_formatting_provider: flag(registry, Formatting::METHOD),
        document_range_formatting_provider: flag(registry, RangeFormatting::METHOD),
        rename_provider: flag(registry, Rename::METHOD),
        folding_range_provider: Some(FoldingRangeProviderCapability::Simple(request(
            FoldingRangeRequest::METHOD,
        ))),
        workspace_symbol_provider: flag(registry, WorkspaceSymbolRequest::METHOD),
        semantic_tokens_provider: semantic_tokens(registry),
        ..ServerCapabilities::default()
    }
}

/// `true` exactly when a request handler for `method` is registered
fn flag<T>(registry: &HandlerRegistry, method: &str) -> Option<OneOf<bool, T>> {
    Some(OneOf::Left(registry.handles_request(method)))
}

/// Open/close, incremental change and save-with-text, if the sync
/// notifications are handled
fn text_document_sync(registry: &HandlerRegistry) -> Option<TextDocumentSyncCapability> {
    let open_close = registry.handles_notification(DidOpenTextDocument::METHOD)
        && registry.handles_notification(DidCloseTextDocument::METHOD);
    let change = registry.handles_notification(DidChangeTextDocument::METHOD);
    let save = registry.handles_notification(DidSaveTextDocument::METHOD);

    if !(open_close || change || save) {
        return None;
    }

    Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
        open_close: Some(open_close),
        change: Some(if change {
            TextDocumentSyncKind::INCREMENTAL
        } else {
            TextDocumentSyncKind::NONE
        }),
        will_save: None,
        will_save_wait_until: None,
        save: save.then_some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
            include_text: Some(true),
        })),
    }))
}

fn semantic_tokens(registry: &HandlerRegistry) -> Option<SemanticTokensServerCapabilities> {
    let full = registry.handles_request(SemanticTokensFullRequest::METHOD);
    let range = registry.handles_request(SemanticTokensRangeRequest::METHOD);

    if !(full || range) {
        return None;
    }

    Some(SemanticTokensServerCapabilities::SemanticTokensOptions(
        SemanticTokensOptions {
            work_done_progress_options: Default::default(),
            legend: SemanticTokensLegend {
                token_types: semantic_token_types(),
                token_modifiers: semantic_token_modifiers(),
            },
            range: Some(range),
            full: Some(SemanticTokensFullOptions::Bool(full)),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::handlers::{bootstrap_registry, default_registry};
    use serde_json::{Value, json};

    fn advertised(registry: &HandlerRegistry) -> Value {
        serde_json::to_value(server_capabilities(registry)).unwrap()
    }

    #[test]
    fn test_default_registry_capabilities() {
        let caps = advertised(&default_registry());

        assert_eq!(caps["hoverProvider"], json!(true));
        assert_eq!(caps["definitionProvider"], json!(true));
        assert_eq!(caps["referencesProvider"], json!(true));
        assert_eq!(caps["documentHighlightProvider"], json!(true));
        assert_eq!(caps["documentSymbolProvider"], json!(true));
        assert_eq!(caps["documentFormattingProvider"], json!(true));
        assert_eq!(caps["renameProvider"], json!(true));

        assert_eq!(caps["typeDefinitionProvider"], json!(false));
        assert_eq!(caps["implementationProvider"], json!(false));
        assert_eq!(caps["documentRangeFormattingProvider"], json!(false));
        assert_eq!(caps["foldingRangeProvider"], json!(false));
        assert_eq!(caps["workspaceSymbolProvider"], json!(false));

        assert!(caps.get("completionProvider").is_none());
        assert!(caps.get("signatureHelpProvider").is_none());
        assert!(caps.get("codeLensProvider").is_none());
        assert!(caps.get("documentLinkProvider").is_none());
        assert!(caps.get("executeCommandProvider").is_none());

        assert_eq!(
            caps["textDocumentSync"],
            json!({"openClose": true, "change": 2, "save": {"includeText": true}})
        );

        let tokens = &caps["semanticTokensProvider"];
        assert_eq!(tokens["full"], json!(true));
        assert_eq!(tokens["range"], json!(false));
        assert_eq!(
            tokens["legend"]["tokenTypes"],
            json!(["class", "variable", "enum", "comment", "string", "keyword"])
        );
        assert_eq!(
            tokens["legend"]["tokenModifiers"],
            json!(["declaration", "documentation"])
        );
    }

    #[test]
    fn test_bootstrap_registry_advertises_nothing_true() {
        let caps = advertised(&bootstrap_registry());
        let object = caps.as_object().unwrap();

        for (name, value) in object {
            assert_ne!(value, &json!(true), "{name} advertised without a handler");
        }
        assert!(caps.get("textDocumentSync").is_none());
        assert!(caps.get("semanticTokensProvider").is_none());
    }
}
