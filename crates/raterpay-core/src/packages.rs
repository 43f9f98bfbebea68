/// Purchasable credit bundles. Checkout initiation and webhook validation
/// must agree on this registry; an event naming an unknown package or a
/// contradictory credit amount is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    pub price_cents: i64,
}

pub const CREDIT_PACKAGES: [CreditPackage; 4] = [
    CreditPackage {
        id: "starter",
        name: "Starter Pack",
        credits: 1,
        price_cents: 1000,
    },
    CreditPackage {
        id: "value",
        name: "Value Pack",
        credits: 5,
        price_cents: 4500,
    },
    CreditPackage {
        id: "pro",
        name: "Pro Pack",
        credits: 10,
        price_cents: 8000,
    },
    CreditPackage {
        id: "enterprise",
        name: "Enterprise Pack",
        credits: 25,
        price_cents: 17500,
    },
];

pub fn find_package(package_id: &str) -> Option<&'static CreditPackage> {
    CREDIT_PACKAGES
        .iter()
        .find(|package| package.id == package_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_packages_resolve() {
        let pack = find_package("value").expect("value pack registered");
        assert_eq!(pack.credits, 5);
        assert_eq!(pack.price_cents, 4500);
    }

    #[test]
    fn unknown_package_is_none() {
        assert!(find_package("mega").is_none());
        assert!(find_package("").is_none());
    }
}
