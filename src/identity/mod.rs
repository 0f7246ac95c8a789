//! Identity carried by every request and mutation.
//! Keep the public surface thin; the ambient lookups live in `request_context`.

mod principal;
mod request_context;

pub use principal::{AuthData, ADMIN_ROLE};
pub use request_context::{
    current_environment, current_request, ensure_logged_in, query_or_mutator_auth_data, request_auth_data,
    with_request_context, RequestContext,
};
