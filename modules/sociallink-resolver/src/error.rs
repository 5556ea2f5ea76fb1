use render_client::RenderError;
use sociallink_common::ResolveError;
use xapi_client::XApiError;

/// Fold a structured-API failure into the resolver taxonomy.
pub(crate) fn from_api(err: XApiError) -> ResolveError {
    match err {
        XApiError::Auth { status } => ResolveError::Auth { status },
        XApiError::Network(msg) => ResolveError::Network(msg),
        XApiError::Api { status, message } => {
            ResolveError::Network(format!("API status {status}: {message}"))
        }
        XApiError::ContentType(ct) => ResolveError::Parse(format!("content type {ct}")),
        XApiError::Parse(msg) => ResolveError::Parse(msg),
        XApiError::MissingField(field) => ResolveError::Parse(format!("missing {field}")),
    }
}

/// Every render failure, malformed output included, counts as a network
/// failure for the tier that asked.
pub(crate) fn from_render(err: RenderError) -> ResolveError {
    ResolveError::Network(format!("render: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_onto_taxonomy() {
        assert_eq!(
            from_api(XApiError::Auth { status: 403 }),
            ResolveError::Auth { status: 403 }
        );
        assert!(matches!(
            from_api(XApiError::ContentType("text/html".into())),
            ResolveError::Parse(_)
        ));
        assert!(matches!(
            from_api(XApiError::Api { status: 500, message: String::new() }),
            ResolveError::Network(_)
        ));
    }

    #[test]
    fn malformed_envelope_is_network_failure() {
        assert!(matches!(
            from_render(RenderError::Envelope("empty output".into())),
            ResolveError::Network(_)
        ));
    }
}
