//! Conversion from wire-format records to the internal [`Record`] form.

use crate::{
    cache::expiry_after,
    core::{to_lower_fqdn, Record},
};
use chrono::{DateTime, Utc};
use hickory_proto::rr::{RData, Record as WireRecord};
use std::time::Duration;

/// Converts a wire record, computing TTL and expiry when `expire` is set.
///
/// SOA, NS, CNAME, A, AAAA and TXT get dedicated value encodings. Any other
/// type is split from its presentation form; `None` is returned when that
/// form has fewer than four fields.
pub fn convert_record(record: &WireRecord, expire: bool) -> Option<Record> {
    let (ttl, expiry) = if expire {
        let ttl = Duration::from_secs(u64::from(record.ttl()));
        (ttl, expiry_after(Utc::now(), ttl))
    } else {
        (Duration::ZERO, DateTime::<Utc>::default())
    };

    let (rtype, value) = match record.data() {
        RData::SOA(soa) => ("SOA", to_lower_fqdn(&soa.mname().to_string())),
        RData::NS(ns) => ("NS", to_lower_fqdn(&ns.0.to_string())),
        RData::CNAME(cname) => ("CNAME", to_lower_fqdn(&cname.0.to_string())),
        RData::A(a) => ("A", a.0.to_string()),
        RData::AAAA(aaaa) => ("AAAA", aaaa.0.to_string()),
        RData::TXT(txt) => (
            "TXT",
            txt.txt_data()
                .iter()
                .map(|segment| String::from_utf8_lossy(segment).into_owned())
                .collect::<Vec<_>>()
                .join("\t"),
        ),
        _ => return convert_presentation(&record.to_string(), ttl, expiry),
    };

    Some(Record {
        name: to_lower_fqdn(&record.name().to_string()),
        rtype: rtype.to_string(),
        value,
        ttl,
        expiry,
    })
}

/// Generic split of `name ttl class type rdata...`.
fn convert_presentation(text: &str, ttl: Duration, expiry: DateTime<Utc>) -> Option<Record> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    Some(Record {
        name: to_lower_fqdn(fields[0]),
        rtype: fields[3].to_string(),
        value: fields[4..].join("\t"),
        ttl,
        expiry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::{
        rdata::{A, AAAA, CNAME, MX, NS, SOA, TXT},
        Name,
    };
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    #[test]
    fn test_address_records() {
        let a = WireRecord::from_rdata(name("WWW.Example.com."), 300, RData::A(A(Ipv4Addr::new(192, 0, 2, 10))));
        let rr = convert_record(&a, true).unwrap();
        assert_eq!(rr.name, "www.example.com.");
        assert_eq!(rr.rtype, "A");
        assert_eq!(rr.value, "192.0.2.10");
        assert_eq!(rr.ttl, Duration::from_secs(300));
        assert!(rr.expiry > Utc::now());

        let aaaa = WireRecord::from_rdata(
            name("www.example.com."),
            300,
            RData::AAAA(AAAA("2001:db8::1".parse::<Ipv6Addr>().unwrap())),
        );
        let rr = convert_record(&aaaa, true).unwrap();
        assert_eq!(rr.rtype, "AAAA");
        assert_eq!(rr.value, "2001:db8::1");
    }

    #[test]
    fn test_name_targets_are_normalized() {
        let ns = WireRecord::from_rdata(name("Example.com."), 3600, RData::NS(NS(name("NS1.Example.com."))));
        let rr = convert_record(&ns, true).unwrap();
        assert_eq!((rr.rtype.as_str(), rr.value.as_str()), ("NS", "ns1.example.com."));

        let cname = WireRecord::from_rdata(name("www.example.com."), 60, RData::CNAME(CNAME(name("Edge.CDN.net."))));
        let rr = convert_record(&cname, true).unwrap();
        assert_eq!((rr.rtype.as_str(), rr.value.as_str()), ("CNAME", "edge.cdn.net."));

        let soa = SOA::new(
            name("NS1.example.com."),
            name("hostmaster.example.com."),
            2024010101,
            7200,
            3600,
            1209600,
            300,
        );
        let rr = convert_record(&WireRecord::from_rdata(name("example.com."), 300, RData::SOA(soa)), true).unwrap();
        assert_eq!((rr.rtype.as_str(), rr.value.as_str()), ("SOA", "ns1.example.com."));
    }

    #[test]
    fn test_txt_segments_are_tab_joined() {
        let txt = TXT::new(vec!["v=spf1".to_string(), "-all".to_string()]);
        let rr = convert_record(&WireRecord::from_rdata(name("example.com."), 60, RData::TXT(txt)), true).unwrap();
        assert_eq!(rr.rtype, "TXT");
        assert_eq!(rr.value, "v=spf1\t-all");
    }

    #[test]
    fn test_unlisted_type_uses_presentation_fields() {
        let mx = MX::new(10, name("mail.example.com."));
        let rr = convert_record(&WireRecord::from_rdata(name("Example.com."), 60, RData::MX(mx)), true).unwrap();
        assert_eq!(rr.name, "example.com.");
        assert_eq!(rr.rtype, "MX");
        assert_eq!(rr.value, "10\tmail.example.com.");
    }

    #[test]
    fn test_without_expiry_leaves_ttl_unset() {
        let ns = WireRecord::from_rdata(name("."), 518400, RData::NS(NS(name("a.root-servers.net."))));
        let rr = convert_record(&ns, false).unwrap();
        assert_eq!(rr.ttl, Duration::ZERO);
        assert_eq!(rr.expiry, DateTime::<Utc>::default());
    }

    #[test]
    fn test_short_presentation_is_rejected() {
        assert!(convert_presentation("example.com. 60 IN", Duration::ZERO, DateTime::<Utc>::default()).is_none());
    }
}
