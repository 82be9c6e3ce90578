// rust-embed embeds the page templates at compile time; make Cargo notice
// when they change.

fn main() {
    println!("cargo:rerun-if-changed=templates/");
}
