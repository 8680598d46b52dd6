//! Which package an order is provisioned under.

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::link;
use crate::models::{Connection, Order, Package, PackageLayout};
use crate::panel::ClientInfo;

/// Resolve the package for `order` on `connection`.
///
/// `existing` is the panel client a renewal targets, when one was found; it
/// is only consulted when a renewal on a package-choice connection does not
/// name its package.
pub fn resolve_package<'a>(
    connection: &'a Connection,
    order: &Order,
    existing: Option<&ClientInfo>,
) -> FulfillmentResult<&'a Package> {
    let package = match &connection.layout {
        PackageLayout::Single { package } => package,
        PackageLayout::Choice { packages } if packages.is_empty() => {
            return Err(FulfillmentError::Configuration(format!(
                "connection '{}' has no packages configured",
                connection.id
            )));
        }
        PackageLayout::Choice { packages } => {
            match order.package.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                Some(name) => packages
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| {
                        FulfillmentError::Configuration(format!(
                            "package '{name}' is not configured on connection '{}'",
                            connection.id
                        ))
                    })?,
                None if order.is_renewal => existing
                    .and_then(|info| deduce_renewal_package(packages, info))
                    .ok_or_else(|| FulfillmentError::AmbiguousRenewal {
                        username: order.renewal_target().to_string(),
                    })?,
                None => {
                    return Err(FulfillmentError::Configuration(format!(
                        "connection '{}' requires a package but order {} names none",
                        connection.id, order.id
                    )));
                }
            }
        }
    };

    if !link::is_valid_template(&package.link_template) {
        return Err(FulfillmentError::Configuration(format!(
            "link template of package '{}' on connection '{}' must contain {} and {}",
            package.name,
            connection.id,
            link::ID_PLACEHOLDER,
            link::NAME_PLACEHOLDER
        )));
    }
    Ok(package)
}

/// Guess the package of an existing client from its username.
///
/// A package matches when the client's username starts (case-insensitively)
/// with the display-name prefix of the package's link template. One match is
/// required; several matches are narrowed to the package owning the client's
/// collection, and anything else is `None`.
pub fn deduce_renewal_package<'a>(packages: &'a [Package], info: &ClientInfo) -> Option<&'a Package> {
    let username = info.client.email.to_lowercase();
    let matches: Vec<&Package> = packages
        .iter()
        .filter(|p| {
            link::name_prefix(&p.link_template)
                .is_some_and(|prefix| username.starts_with(&prefix.to_lowercase()))
        })
        .collect();

    match matches.as_slice() {
        [only] => Some(*only),
        [] => None,
        several => {
            let mut owning = several.iter().filter(|p| p.inbound_id == info.inbound_id);
            match (owning.next(), owning.next()) {
                (Some(package), None) => Some(*package),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelClient;
    use uuid::Uuid;

    fn package(name: &str, inbound_id: i64, prefix: &str) -> Package {
        Package {
            name: name.to_string(),
            inbound_id,
            link_template: format!("vless://{{uuid}}@{name}.example.net:443#{prefix}{{name}}"),
            flow: None,
        }
    }

    fn choice(packages: Vec<Package>) -> Connection {
        Connection {
            id: "X".into(),
            name: "X".into(),
            layout: PackageLayout::Choice { packages },
            auto_approve: false,
        }
    }

    fn info(email: &str, inbound_id: i64) -> ClientInfo {
        ClientInfo {
            client: PanelClient {
                id: "id".into(),
                email: email.into(),
                total_bytes: 0,
                expiry_time: 0,
                enable: true,
                flow: String::new(),
                sub_id: String::new(),
                extra: Default::default(),
            },
            inbound_id,
            usage: None,
        }
    }

    fn renewal() -> Order {
        let mut order = Order::new_pending(Uuid::new_v4(), "de-bob", "p", "X");
        order.is_renewal = true;
        order
    }

    #[test]
    fn explicit_package_is_used_directly() {
        let connection = choice(vec![package("de", 1, "DE-"), package("nl", 2, "NL-")]);
        let mut order = Order::new_pending(Uuid::new_v4(), "bob", "p", "X");
        order.package = Some("NL".into());
        assert_eq!(resolve_package(&connection, &order, None).unwrap().inbound_id, 2);

        order.package = Some("fr".into());
        assert!(matches!(
            resolve_package(&connection, &order, None),
            Err(FulfillmentError::Configuration(_))
        ));
    }

    #[test]
    fn renewal_package_is_deduced_from_username_prefix() {
        let connection = choice(vec![package("de", 1, "DE-"), package("nl", 2, "NL-")]);
        let found = info("de-bob", 1);
        let resolved = resolve_package(&connection, &renewal(), Some(&found)).unwrap();
        assert_eq!(resolved.name, "de");
    }

    #[test]
    fn renewal_without_match_or_client_is_ambiguous() {
        let connection = choice(vec![package("de", 1, "DE-"), package("nl", 2, "NL-")]);
        assert!(matches!(
            resolve_package(&connection, &renewal(), Some(&info("fr-bob", 3))),
            Err(FulfillmentError::AmbiguousRenewal { .. })
        ));
        assert!(matches!(
            resolve_package(&connection, &renewal(), None),
            Err(FulfillmentError::AmbiguousRenewal { .. })
        ));
    }

    #[test]
    fn overlapping_prefixes_fall_back_to_owning_collection() {
        let packages = vec![package("de", 1, "DE-"), package("de-premium", 2, "DE-P")];
        assert_eq!(deduce_renewal_package(&packages, &info("de-pete", 2)).unwrap().name, "de-premium");
        assert!(deduce_renewal_package(&packages, &info("de-pete", 9)).is_none());
        assert_eq!(deduce_renewal_package(&packages, &info("de-anna", 9)).unwrap().name, "de");
    }

    #[test]
    fn new_purchase_on_choice_connection_needs_a_package() {
        let connection = choice(vec![package("de", 1, "DE-")]);
        let order = Order::new_pending(Uuid::new_v4(), "bob", "p", "X");
        assert!(matches!(
            resolve_package(&connection, &order, None),
            Err(FulfillmentError::Configuration(_))
        ));
    }

    #[test]
    fn template_without_placeholders_is_a_configuration_error() {
        let connection = Connection {
            id: "Y".into(),
            name: "Y".into(),
            layout: PackageLayout::Single {
                package: Package {
                    name: "default".into(),
                    inbound_id: 1,
                    link_template: "vless://static@host:443".into(),
                    flow: None,
                },
            },
            auto_approve: false,
        };
        let order = Order::new_pending(Uuid::new_v4(), "bob", "p", "Y");
        assert!(matches!(
            resolve_package(&connection, &order, None),
            Err(FulfillmentError::Configuration(_))
        ));
    }
}
