// src/banner.rs

/// Prints the application startup banner to the console.
pub fn print_banner() {
    let banner = r#"
     _    _ _ _                 _
 ___| | _(_) | | _____   ____ _| |
/ __| |/ / | | |/ _ \ \ / / _` | |
\__ \   <| | | |  __/\ V / (_| | |
|___/_|\_\_|_|_|\___| \_/ \__,_|_|

    Skill × Agent Evaluation Matrix Runner
"#;
    println!("{}", banner);
    println!("    v{}", env!("CARGO_PKG_VERSION"));
}
