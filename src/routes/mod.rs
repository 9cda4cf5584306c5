/// Router Module Index
///
/// Organizes the routing logic into access-segregated modules. Every route still passes the
/// gatekeeper first; these modules add the per-group guards on top.

/// Routes accessible to everyone (anonymous or signed in).
pub mod public;

/// Sign-in, sign-up, OAuth callback and sign-out. Sign-in pages are auth-only:
/// the gatekeeper bounces signed-in callers away from them.
pub mod auth;

/// Routes protected by the `AuthUser` extractor middleware.
/// Requires a validated session and an existing profile.
pub mod authenticated;

/// Routes restricted to the 'admin' role.
pub mod admin;
