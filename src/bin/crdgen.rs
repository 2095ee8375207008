//! Prints the SearchService CustomResourceDefinition as YAML.
//!
//! ```sh
//! cargo run --bin crdgen > config/crd/searchservice.yaml
//! ```

use kube::CustomResourceExt;
use search_operator::crd::SearchService;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SearchService::crd())?);
    Ok(())
}
