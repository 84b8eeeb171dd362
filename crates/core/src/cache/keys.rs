//! Cache key builders shared by the services.
//!
//! Keys are `{namespace}:{id}` strings so that whole namespaces can be
//! invalidated with a single glob (see [`namespace_pattern`]).

use std::fmt::Display;

/// Returns the cache key for a user.
pub fn user_key(user_id: impl Display) -> String {
    format!("user:{}", user_id)
}

/// Returns the cache key for a product.
pub fn product_key(product_id: impl Display) -> String {
    format!("product:{}", product_id)
}

/// Returns the cache key for a category.
pub fn category_key(category_id: impl Display) -> String {
    format!("category:{}", category_id)
}

/// Returns the cache key for an order.
pub fn order_key(order_id: impl Display) -> String {
    format!("order:{}", order_id)
}

/// Returns the cache key for a paginated product listing.
pub fn product_list_key(page: u32, per_page: u32) -> String {
    format!("products:list:{}:{}", page, per_page)
}

/// Returns the counter key used to rate limit `scope` for a client address.
pub fn rate_limit_key(scope: &str, client: &str) -> String {
    format!("ratelimit:{}:{}", scope, client)
}

/// Returns the glob pattern matching every key in a namespace.
pub fn namespace_pattern(namespace: &str) -> String {
    format!("{}:*", namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::pattern_matches;

    #[test]
    fn test_entity_keys() {
        assert_eq!(user_key(7), "user:7");
        assert_eq!(product_key(42), "product:42");
        assert_eq!(category_key("phones"), "category:phones");
        assert_eq!(order_key("A-100"), "order:A-100");
    }

    #[test]
    fn test_product_list_key() {
        assert_eq!(product_list_key(2, 20), "products:list:2:20");
    }

    #[test]
    fn test_rate_limit_key() {
        assert_eq!(
            rate_limit_key("login", "1.2.3.4"),
            "ratelimit:login:1.2.3.4"
        );
    }

    #[test]
    fn test_namespace_pattern_matches_its_keys_only() {
        let pattern = namespace_pattern("user");
        assert_eq!(pattern, "user:*");
        assert!(pattern_matches(&pattern, &user_key(1)));
        assert!(!pattern_matches(&pattern, &product_key(1)));
    }
}
