//! Error rendering and error mapping

use http::{HeaderMap, StatusCode};
use serde_json::Value;
use service_runtime::error::{AuthError, map_call_error};
use service_runtime::{CallContext, CallError, ErrorCode, ErrorMapper, ErrorResponse};
use tonic::Code;
use uuid::Uuid;

fn ctx() -> CallContext {
    CallContext::new("/orders.v1.Orders/List", HeaderMap::new(), None)
}

#[test]
fn call_errors_map_to_transport_codes() {
    let cases = [
        (
            CallError::Unauthenticated(AuthError::TokenMissing),
            Code::Unauthenticated,
            StatusCode::UNAUTHORIZED,
        ),
        (
            CallError::Unauthorized {
                endpoint: "GET /orders".to_string(),
            },
            Code::PermissionDenied,
            StatusCode::FORBIDDEN,
        ),
        (
            CallError::DeadlineExceeded,
            Code::DeadlineExceeded,
            StatusCode::GATEWAY_TIMEOUT,
        ),
        (
            CallError::HandlerPanic {
                message: "index out of bounds".to_string(),
            },
            Code::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, grpc, http) in cases {
        let code = error.code();
        assert_eq!(code.grpc_code(), grpc, "{error}");
        assert_eq!(code.http_status(), http, "{error}");
    }
}

#[test]
fn json_body_carries_code_description_and_correlation_id() {
    let correlation_id = Uuid::new_v4();
    let response = ErrorResponse::from_call_error(&CallError::DeadlineExceeded, correlation_id);

    let body: Value = serde_json::from_str(&response.to_json()).unwrap();

    assert_eq!(body["status"]["code"], "DEADLINE_EXCEEDED");
    assert_eq!(body["status"]["description"], "Request timed out");
    assert_eq!(body["correlation_id"], correlation_id.to_string());
}

#[test]
fn status_message_includes_correlation_id() {
    let correlation_id = Uuid::new_v4();
    let response = ErrorResponse::from_call_error(
        &CallError::Unauthenticated(AuthError::TokenExpired),
        correlation_id,
    );

    let status = response.to_status();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert!(status.message().contains(&correlation_id.to_string()));
}

#[test]
fn sensitive_messages_are_replaced() {
    let response = ErrorResponse::new(
        ErrorCode::InvalidArgument,
        "bearer token abc.def.ghi was rejected",
        Uuid::new_v4(),
    );

    assert_eq!(response.message, "Request rejected");
}

#[test]
fn mapper_falls_back_to_default_rendering() {
    let only_deadlines = |ctx: &CallContext, error: &CallError| {
        matches!(error, CallError::DeadlineExceeded).then(|| {
            ErrorResponse::new(ErrorCode::Unavailable, "Try again later", ctx.correlation_id())
        })
    };
    let mapper: &dyn ErrorMapper = &only_deadlines;
    let ctx = ctx();

    let mapped = map_call_error(Some(mapper), &ctx, &CallError::DeadlineExceeded);
    assert_eq!(mapped.code, ErrorCode::Unavailable);
    assert_eq!(mapped.correlation_id, ctx.correlation_id());

    let fallback = map_call_error(
        Some(mapper),
        &ctx,
        &CallError::Unauthorized {
            endpoint: "GET /orders".to_string(),
        },
    );
    assert_eq!(fallback.code, ErrorCode::PermissionDenied);
    assert_eq!(fallback.message, "Permission denied");

    let unmapped = map_call_error(None, &ctx, &CallError::DeadlineExceeded);
    assert_eq!(unmapped.code, ErrorCode::DeadlineExceeded);
}

#[test]
fn mapper_trait_objects_are_usable() {
    struct Fixed;

    impl ErrorMapper for Fixed {
        fn map_error(&self, ctx: &CallContext, _error: &CallError) -> Option<ErrorResponse> {
            Some(ErrorResponse::new(ErrorCode::NotFound, "Not found", ctx.correlation_id()))
        }
    }

    let mapper: std::sync::Arc<dyn ErrorMapper> = std::sync::Arc::new(Fixed);
    let response = map_call_error(Some(mapper.as_ref()), &ctx(), &CallError::DeadlineExceeded);

    assert_eq!(response.code, ErrorCode::NotFound);
    assert_eq!(response.to_status().code(), Code::NotFound);
}
