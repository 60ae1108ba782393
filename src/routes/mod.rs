/// Router Module Index
///
/// Organizes the application's routing logic into security-segregated modules.
/// Access control is applied explicitly at the module level (via Axum layers),
/// preventing accidental exposure of protected endpoints.

/// Routes accessible to all callers, anonymous or logged-in. This includes the
/// post create/delete endpoints, which the source system left unprotected.
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware.
/// Requires a validated session.
pub mod authenticated;
