//! Proxy naming hierarchy.
//!
//! Proxy ids look like `SCPIngressProxy_01_Pune`: the city is the last
//! `_`-separated part and the network-function type is the first part with
//! its `IngressProxy` (or else `Proxy`) suffix removed.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyName {
    pub id: String,
    pub city: String,
    pub nf_type: String,
}

impl ProxyName {
    pub fn parse(id: &str) -> Self {
        let city = id.rsplit('_').next().unwrap_or(id).to_string();
        let head = id.split('_').next().unwrap_or(id);
        let nf_type = head
            .strip_suffix("IngressProxy")
            .or_else(|| head.strip_suffix("Proxy"))
            .unwrap_or(head)
            .to_string();
        Self {
            id: id.to_string(),
            city,
            nf_type,
        }
    }
}

/// City -> network-function type -> sorted proxy ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyHierarchy {
    pub cities: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl ProxyHierarchy {
    pub fn build<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cities: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for id in ids {
            let name = ProxyName::parse(id.as_ref());
            cities
                .entry(name.city)
                .or_default()
                .entry(name.nf_type)
                .or_default()
                .push(name.id);
        }
        for proxies in cities.values_mut().flat_map(|types| types.values_mut()) {
            proxies.sort();
            proxies.dedup();
        }
        Self { cities }
    }

    pub fn proxies(&self, city: &str, nf_type: &str) -> &[String] {
        self.cities
            .get(city)
            .and_then(|types| types.get(nf_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.cities
            .values()
            .flat_map(|types| types.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indented text tree for the console.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (city, types) in &self.cities {
            out.push_str(city);
            out.push('\n');
            for (nf_type, proxies) in types {
                out.push_str(&format!("  {nf_type} ({})\n", proxies.len()));
                for proxy in proxies {
                    out.push_str(&format!("    {proxy}\n"));
                }
            }
        }
        out
    }
}
