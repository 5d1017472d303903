// GetCurrentModule: the path segment at index 2 after splitting by "/",
// with any query string stripped. `/api/foo/bar?x=1` -> "foo".

pub fn get_current_module(uri: &str) -> Option<&str> {
    let without_query = uri.split('?').next().unwrap_or(uri);
    without_query.split('/').nth(2)
}
