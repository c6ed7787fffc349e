use kube::CustomResourceExt;
use kube_converge::crd::Router;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Router::crd())?);
    Ok(())
}
