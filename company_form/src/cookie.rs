use cookie::Cookie;

/// Reads one value out of a `Cookie` header, e.g. `pending_company_name`.
/// Values are percent-decoded and lose their surrounding double quotes.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse_encoded(header)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value_trimmed().to_string())
}
