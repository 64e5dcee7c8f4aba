//! Topology graph export.
//!
//! Renders the wiring log as a Graphviz digraph: processes as boxes,
//! standalone shared regions as ellipses, queue connections as edges
//! labeled with their category and channel-id pair, region attachments as
//! edges labeled with the mapped permissions.

use crate::record::WiringLog;
use fw_sysdesc::SystemDescription;
use std::fmt::Write as _;

#[must_use]
pub fn render(sys: &SystemDescription, log: &WiringLog) -> String {
    let mut out = String::from("digraph firewall {\n    rankdir=LR;\n    node [shape=box];\n");

    let mut pds: Vec<&str> = Vec::new();
    for conn in log.connections() {
        for pd in [conn.a, conn.b] {
            let name = sys.pd_name(pd);
            if !pds.contains(&name) {
                pds.push(name);
            }
        }
    }
    for name in &pds {
        let _ = writeln!(out, "    \"{name}\";");
    }

    for region in log.regions() {
        let _ = writeln!(
            out,
            "    \"{}\" [shape=ellipse, label=\"{}\\n{}\"];",
            region.name,
            region.name,
            region.kind.label()
        );
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\" [label=\"{}\", style=dashed];",
            sys.pd_name(region.owner),
            region.name,
            region.owner_perms
        );
        if let Some((peer, perms)) = region.peer {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\" [label=\"{}\", style=dashed];",
                sys.pd_name(peer),
                region.name,
                perms
            );
        }
    }

    for conn in log.connections() {
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\" [label=\"{} ({}:{})\"];",
            sys.pd_name(conn.a),
            sys.pd_name(conn.b),
            conn.kind.label(),
            conn.ch_a,
            conn.ch_b
        );
    }

    out.push_str("}\n");
    out
}
