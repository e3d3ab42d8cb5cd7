use super::*;

#[test]
fn http_status_mapping() {
    assert_eq!(AppError::user("bad_input", "oops").http_status(), 400);
    assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
    assert_eq!(AppError::conflict("conflict", "dup").http_status(), 409);
    assert_eq!(AppError::auth("auth", "no").http_status(), 401);
    assert_eq!(AppError::forbidden("forbidden", "blocked").http_status(), 403);
    assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
}

#[test]
fn store_errors_map_to_protocol_statuses() {
    let cases = [
        (StoreError::InvalidId("..".into()), 400),
        (StoreError::NotFound("a/b".into()), 404),
        (StoreError::VersionNotFound, 404),
        (StoreError::AlreadyExists("a/b".into()), 409),
        (StoreError::LockConflict, 409),
        (StoreError::NotLocked, 409),
        (StoreError::VersionConflict("role admin".into()), 409),
        (StoreError::Forbidden, 403),
        (StoreError::Unauthorized, 401),
        (StoreError::Internal("disk on fire".into()), 500),
    ];
    for (err, status) in cases {
        assert_eq!(AppError::from(err.clone()).http_status(), status, "{err}");
    }
}

#[test]
fn internal_and_forbidden_messages_do_not_leak_details() {
    let app: AppError = StoreError::Internal("s3 bucket creds expired".into()).into();
    assert_eq!(app.message(), "internal error");
    let app: AppError = StoreError::Forbidden.into();
    assert_eq!(app.message(), "insufficient permissions");
}

#[test]
fn display_includes_code() {
    let e = AppError::conflict("lock_conflict", "unit is locked");
    assert_eq!(e.to_string(), "lock_conflict: unit is locked");
}
