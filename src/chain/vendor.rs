//! Node software families and the RPC methods each one speaks

use std::fmt;
use std::path::Path;

/// Which node implementation a chain directory runs.
///
/// The vendor is fixed at resolution time and decides the RPC method names
/// used for identity queries and peering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeVendor {
    Geth,
    Parity,
}

/// How the identity query returns the enode address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityShape {
    /// An object whose `enode` field holds the address
    EnodeField,
    /// The address as a bare string
    Direct,
}

/// RPC method table for a vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorMethods {
    pub identity: &'static str,
    pub identity_shape: IdentityShape,
    pub add_peer: &'static str,
    /// Whether `?discport=` style suffixes must be dropped from peer addresses
    pub strip_enode_query: bool,
}

const GETH_METHODS: VendorMethods = VendorMethods {
    identity: "admin_nodeInfo",
    identity_shape: IdentityShape::EnodeField,
    add_peer: "admin_addPeer",
    strip_enode_query: false,
};

const PARITY_METHODS: VendorMethods = VendorMethods {
    identity: "parity_enode",
    identity_shape: IdentityShape::Direct,
    add_peer: "parity_addReservedPeer",
    strip_enode_query: true,
};

impl NodeVendor {
    /// Detect the vendor from an executable's file name prefix
    pub fn from_executable(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.starts_with("parity") {
            NodeVendor::Parity
        } else {
            NodeVendor::Geth
        }
    }

    pub fn methods(&self) -> &'static VendorMethods {
        match self {
            NodeVendor::Geth => &GETH_METHODS,
            NodeVendor::Parity => &PARITY_METHODS,
        }
    }

    /// Prepare a peer's enode address for this vendor's add-peer call
    pub fn peer_address<'a>(&self, enode: &'a str) -> &'a str {
        if self.methods().strip_enode_query {
            strip_enode_query(enode)
        } else {
            enode
        }
    }
}

impl fmt::Display for NodeVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeVendor::Geth => write!(f, "geth"),
            NodeVendor::Parity => write!(f, "parity"),
        }
    }
}

/// Drop a `?...` query fragment from an enode URL
pub fn strip_enode_query(enode: &str) -> &str {
    match enode.find('?') {
        Some(idx) => &enode[..idx],
        None => enode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_from_executable_prefix() {
        assert_eq!(
            NodeVendor::from_executable(Path::new("/chains/a/parity-1.7")),
            NodeVendor::Parity
        );
        assert_eq!(
            NodeVendor::from_executable(Path::new("/chains/b/Parity")),
            NodeVendor::Parity
        );
        assert_eq!(
            NodeVendor::from_executable(Path::new("/chains/c/geth-classic")),
            NodeVendor::Geth
        );
        assert_eq!(
            NodeVendor::from_executable(Path::new("/chains/d/node")),
            NodeVendor::Geth
        );
    }

    #[test]
    fn test_only_parity_strips_query() {
        let enode = "enode://abc@10.0.0.1:30303?discport=0";
        assert_eq!(NodeVendor::Geth.peer_address(enode), enode);
        assert_eq!(
            NodeVendor::Parity.peer_address(enode),
            "enode://abc@10.0.0.1:30303"
        );
        assert_eq!(strip_enode_query("enode://abc@h:1"), "enode://abc@h:1");
    }

    #[test]
    fn test_method_table() {
        assert_eq!(NodeVendor::Geth.methods().identity, "admin_nodeInfo");
        assert_eq!(NodeVendor::Parity.methods().add_peer, "parity_addReservedPeer");
        assert_eq!(
            NodeVendor::Parity.methods().identity_shape,
            IdentityShape::Direct
        );
    }
}
