/// Builds a page context from `name: value` pairs.
macro_rules! context {
    () => {
        ::tera::Context::new()
    };
    ($($name:ident : $value:expr),+ $(,)*) => {{
        let mut page = ::tera::Context::new();
        $(page.add(stringify!($name), &$value);)+
        page
    }};
}
