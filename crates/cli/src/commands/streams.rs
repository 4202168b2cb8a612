use anyhow::Result;

use github::{catalog, CatalogConfig};
use tap::StreamDefinition;

/// Execute the `streams` command: print the catalog as a tree.
pub fn execute() -> Result<()> {
    let graph = catalog(&CatalogConfig::new("org:example"))?;
    for root in graph.roots() {
        print_stream(&graph, root, 0);
    }
    Ok(())
}

fn print_stream(graph: &tap::StreamGraph, stream: &StreamDefinition, depth: usize) {
    let replication = stream
        .replication_key
        .as_ref()
        .map_or_else(|| "full table".to_owned(), |k| format!("{} ({})", k.field, k.kind));
    println!(
        "{:indent$}{:<w$} {:<50} {}",
        "",
        stream.name.as_str(),
        stream.path.to_string(),
        replication,
        indent = depth * 2,
        w = 24 - depth * 2,
    );
    for child in graph.children(&stream.name) {
        print_stream(graph, child, depth + 1);
    }
}
