//! Property tests for claims-to-authorities conversion.

use oauth2_addons::server::auth::{
    AuthoritiesConverter, CaseMode, ClaimPathAuthoritiesConverter, IssuerConfig,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

fn issuer(prefix: &str, case: CaseMode) -> IssuerConfig {
    IssuerConfig::new("https://idp.example.com")
        .with_claims(["realm_access.roles", "resource_access.api.roles"])
        .with_prefix(prefix)
        .with_case(case)
}

proptest! {
    #[test]
    fn prefix_then_upper(
        roles in prop::collection::vec("[a-zA-Z_]{1,12}", 0..10),
        prefix in "[a-z_]{0,6}",
    ) {
        let claims = json!({"realm_access": {"roles": roles}});
        let authorities = ClaimPathAuthoritiesConverter.convert(&claims, &issuer(&prefix, CaseMode::Upper));

        let expected: BTreeSet<String> = roles
            .iter()
            .map(|r| format!("{}{}", prefix, r).to_uppercase())
            .collect();
        prop_assert_eq!(authorities, expected);
    }

    #[test]
    fn conversion_is_deterministic_union(
        realm in prop::collection::vec("[A-Z]{1,6}", 0..6),
        client in prop::collection::vec("[A-Z]{1,6}", 0..6),
    ) {
        let claims = json!({
            "realm_access": {"roles": realm},
            "resource_access": {"api": {"roles": client}},
        });
        let config = issuer("", CaseMode::Unchanged);

        let first = ClaimPathAuthoritiesConverter.convert(&claims, &config);
        let second = ClaimPathAuthoritiesConverter.convert(&claims, &config);
        prop_assert_eq!(&first, &second);

        let expected: BTreeSet<String> = realm.iter().chain(client.iter()).cloned().collect();
        prop_assert_eq!(first, expected);
    }
}
