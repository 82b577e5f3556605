fn main() {
    // Embedded default configuration
    println!("cargo:rerun-if-changed=default_config.ron");

    // Rebuild if any fluid stage shader changes (they are pulled in with include_str!)
    for stage in [
        "base_vertex",
        "clear",
        "display",
        "splat",
        "advection",
        "divergence",
        "curl",
        "vorticity",
        "pressure",
        "gradient_subtract",
    ] {
        println!("cargo:rerun-if-changed=shaders/fluid/{stage}.wgsl");
    }
}
