//! ---
//! twin_section: "01-core-functionality"
//! twin_subsection: "build"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Build script emitting version metadata."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_build().all_cargo().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
