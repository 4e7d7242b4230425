//! QR code → backend name routing rules.

/// One routing rule: any of `markers` in the QR code selects `backend`.
#[derive(Debug, Clone, Copy)]
pub struct RoutingRule {
    pub markers: &'static [&'static str],
    pub backend: &'static str,
}

/// Rules in priority order. `/DWI/` must be checked before `/DW/`.
pub const ROUTING_RULES: &[RoutingRule] = &[
    RoutingRule {
        markers: &["/DWI/"],
        backend: "Dss",
    },
    RoutingRule {
        markers: &["/DW/"],
        backend: "DwiMados",
    },
    RoutingRule {
        markers: &["/RC/", "/DL/"],
        backend: "EirMados",
    },
];

/// Backend name selected by the first matching rule (case-insensitive substring match).
pub fn match_rule(qr_code: &str) -> Option<&'static str> {
    let upper = qr_code.to_ascii_uppercase();
    ROUTING_RULES
        .iter()
        .find(|rule| rule.markers.iter().any(|marker| upper.contains(marker)))
        .map(|rule| rule.backend)
}
