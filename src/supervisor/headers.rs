//! SIP custom header injection on origination (spec §6).
//!
//! Ground: `original_source/utils/sip.go` `CreateSIPHeaders` /
//! `CreateSIPHeadersForSIPTrunkCall`. The gateway client carries these as
//! `SIPADDHEADERn` channel variables, numbered from 0; caller-supplied
//! extra headers continue the numbering from the builder's last fixed
//! slot upward, matching the Go original's `headerCounter`.

use std::collections::HashMap;

/// Standard origination headers (spec §6): key, domain, route type,
/// caller, and the platform call id. `extra` continues the numbering
/// from `SIPADDHEADER5` (e.g. the `OUTGOING_TRUNK_CALL` dispatcher action
/// adds `X-Lineblocs-User-SIP-Trunk-Calling-PSTN: true` here).
pub fn build_sip_headers(
    domain: &str,
    caller_id: &str,
    call_type: &str,
    api_call_id: i64,
    lineblocs_key: &str,
    extra: &[(String, String)],
) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert(
        "SIPADDHEADER0".to_string(),
        format!("X-LineBlocs-Key: {lineblocs_key}"),
    );
    headers.insert(
        "SIPADDHEADER1".to_string(),
        format!("X-LineBlocs-Domain: {domain}"),
    );
    headers.insert(
        "SIPADDHEADER2".to_string(),
        format!("X-LineBlocs-Route-Type: {call_type}"),
    );
    headers.insert(
        "SIPADDHEADER3".to_string(),
        format!("X-LineBlocs-Caller: {caller_id}"),
    );
    headers.insert(
        "SIPADDHEADER4".to_string(),
        format!("X-LineBlocs-API-CallId: {api_call_id}"),
    );
    for (i, (name, value)) in extra.iter().enumerate() {
        headers.insert(format!("SIPADDHEADER{}", 5 + i), format!("{name}: {value}"));
    }
    headers
}

/// SIP-trunk variant (spec §6): same five fixed headers plus the trunk
/// address and a trunk-call marker at slots 5 and 6.
pub fn build_sip_trunk_headers(
    domain: &str,
    caller_id: &str,
    call_type: &str,
    api_call_id: i64,
    lineblocs_key: &str,
    trunk_addr: &str,
) -> HashMap<String, String> {
    let mut headers = build_sip_headers(domain, caller_id, call_type, api_call_id, lineblocs_key, &[]);
    headers.insert(
        "SIPADDHEADER5".to_string(),
        format!("X-Lineblocs-User-SIP-Trunk-Addr: {trunk_addr}"),
    );
    headers.insert(
        "SIPADDHEADER6".to_string(),
        "X-Lineblocs-User-SIP-Trunk: true".to_string(),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_headers_carry_fixed_slots() {
        let h = build_sip_headers("acme.lineblocs.com", "15551234", "pstn", 42, "secret", &[]);
        assert_eq!(h.get("SIPADDHEADER0").unwrap(), "X-LineBlocs-Key: secret");
        assert_eq!(h.get("SIPADDHEADER2").unwrap(), "X-LineBlocs-Route-Type: pstn");
        assert_eq!(h.get("SIPADDHEADER4").unwrap(), "X-LineBlocs-API-CallId: 42");
    }

    #[test]
    fn extra_headers_continue_numbering_from_five() {
        let extra = vec![(
            "X-Lineblocs-User-SIP-Trunk-Calling-PSTN".to_string(),
            "true".to_string(),
        )];
        let h = build_sip_headers("acme.lineblocs.com", "15551234", "pstn", 42, "secret", &extra);
        assert_eq!(
            h.get("SIPADDHEADER5").unwrap(),
            "X-Lineblocs-User-SIP-Trunk-Calling-PSTN: true"
        );
    }

    #[test]
    fn trunk_headers_carry_addr_and_marker() {
        let h = build_sip_trunk_headers("acme.lineblocs.com", "15551234", "pstn", 7, "secret", "10.0.0.5");
        assert_eq!(
            h.get("SIPADDHEADER5").unwrap(),
            "X-Lineblocs-User-SIP-Trunk-Addr: 10.0.0.5"
        );
        assert_eq!(h.get("SIPADDHEADER6").unwrap(), "X-Lineblocs-User-SIP-Trunk: true");
    }
}
