use syncrepl_types::{EntryUuid, ModList, ModOp, Modification};

use crate::rules::ModBuilderRules;

/// A fully materialized entry as received from a raw sync (refresh
/// `syncStateValue` with `SyncAdd`/`SyncModify`, or the initial DirSync
/// enumeration) plus the UUID the sync control carried alongside it (spec
/// §4.3 "Raw sync entry").
#[derive(Debug, Clone)]
pub struct RawSyncEntry {
    pub dn: String,
    pub uuid: EntryUuid,
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

/// Converts a raw sync entry into a `replace`-every-attribute [`ModList`]
/// suitable for full-entry application, or as input to the diff algorithm
/// (spec §4.5). The context entry's own `contextCSN` updates are dropped
/// here (they do not describe a change to `entry`'s DN); provider-side
/// `nsUniqueId` is replaced outright by the UUID carried on the wire
/// rather than trusted from the entry's own attribute list.
pub fn build_mods_from_raw_entry(
    entry: &RawSyncEntry,
    context_dn: &str,
    rules: &ModBuilderRules,
) -> ModList {
    let mut out = ModList::new();
    out.push(Modification::new(ModOp::Replace, "entryuuid").with_value(entry.uuid.to_string()));

    for (attr, values) in &entry.attributes {
        if attr.eq_ignore_ascii_case("nsuniqueid") {
            continue;
        }
        if attr.eq_ignore_ascii_case("contextcsn") && entry.dn.eq_ignore_ascii_case(context_dn) {
            continue;
        }
        if rules.is_dropped(attr) {
            continue;
        }
        let mut m = Modification::new(ModOp::Replace, attr);
        for v in values {
            let value = if rules.is_dn_syntax(attr) {
                rules.rewrite_dn_value(v)
            } else {
                v.clone()
            };
            m = m.with_value(value);
        }
        out.push(m);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dn: &str, attrs: &[(&str, &[&[u8]])]) -> RawSyncEntry {
        RawSyncEntry {
            dn: dn.to_string(),
            uuid: EntryUuid::from_octets([7u8; 16]),
            attributes: attrs
                .iter()
                .map(|(a, vs)| ((*a).to_string(), vs.iter().map(|v| v.to_vec()).collect()))
                .collect(),
        }
    }

    #[test]
    fn drops_context_csn_update_on_the_context_entry() {
        let rules = ModBuilderRules::default();
        let e = entry(
            "dc=example,dc=com",
            &[("contextcsn", &[b"20240101000000.000000Z#000001#001#000000"])],
        );
        let mods = build_mods_from_raw_entry(&e, "dc=example,dc=com", &rules);
        assert_eq!(mods.len(), 1, "only the synthesized entryuuid mod remains");
        assert_eq!(mods[0].attribute, "entryuuid");
    }

    #[test]
    fn keeps_context_csn_on_non_context_entries() {
        let rules = ModBuilderRules::default();
        let e = entry(
            "uid=alice,dc=example,dc=com",
            &[("contextcsn", &[b"irrelevant-here"])],
        );
        let mods = build_mods_from_raw_entry(&e, "dc=example,dc=com", &rules);
        assert!(mods.iter().any(|m| m.attribute == "contextcsn"));
    }

    #[test]
    fn strips_provider_ns_unique_id_in_favor_of_wire_uuid() {
        let rules = ModBuilderRules::default();
        let e = entry(
            "uid=alice,dc=example,dc=com",
            &[("nsuniqueid", &[b"6092d33a-011611e2-9b0f8393-62c55cd1"])],
        );
        let mods = build_mods_from_raw_entry(&e, "dc=example,dc=com", &rules);
        assert!(mods.iter().all(|m| m.attribute != "nsuniqueid"));
        assert_eq!(mods[0].attribute, "entryuuid");
        assert_eq!(
            String::from_utf8(mods[0].values[0].clone()).unwrap(),
            EntryUuid::from_octets([7u8; 16]).to_string()
        );
    }

    #[test]
    fn excluded_attribute_is_dropped() {
        let mut rules = ModBuilderRules::default();
        rules.excluded_attrs.insert("userpassword".to_string());
        let e = entry(
            "uid=alice,dc=example,dc=com",
            &[("cn", &[b"Alice"]), ("userpassword", &[b"secret"])],
        );
        let mods = build_mods_from_raw_entry(&e, "dc=example,dc=com", &rules);
        assert!(mods.iter().all(|m| m.attribute != "userpassword"));
    }
}
