//! Symbol mangling for emitted C.
//!
//! Top-level functions become `<module>__<name>`, methods
//! `<module>__<class>__<method>`, and nested functions/lambdas gain a
//! byte-offset suffix that keeps specialized instantiations unique.

/// Replaces anything C identifiers cannot carry.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub fn function(module: &str, name: &str) -> String {
    format!("{}__{}", sanitize(module), sanitize(name))
}

pub fn method(module: &str, class: &str, name: &str) -> String {
    format!("{}__{}__{}", sanitize(module), sanitize(class), sanitize(name))
}

pub fn module_init(module: &str) -> String {
    format!("{}__init", sanitize(module))
}

pub fn nested(module: &str, name: &str, offset: u32) -> String {
    format!("{}__{}__{offset}", sanitize(module), sanitize(name))
}

pub fn global(module: &str, slot: u32) -> String {
    format!("{}__g{slot}", sanitize(module))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{function, method, nested};

    #[test]
    fn mangled_names_are_c_identifiers() {
        assert_eq!(function("main", "fib"), "main__fib");
        assert_eq!(method("main", "Dog", "speak"), "main__Dog__speak");
        assert_eq!(nested("main", "<lambda>", 42), "main___lambda___42");
    }
}
