use webhive_core::{Config, Paths};
use webhive_tools::browser::driver::find_browser_binary;

/// Run environment diagnostics.
pub fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("webhive doctor — environment diagnostics");
    println!("========================================");
    println!();

    let mut err_count = 0u32;

    // Config
    println!("Configuration");
    if paths.config_file().exists() {
        print_ok("config file", &paths.config_file().display().to_string());
    } else {
        print_warn("config file missing", "defaults will be used");
    }
    match Config::load_or_default(&paths) {
        Ok(config) => {
            println!(
                "   capacity={} idleTimeoutSecs={} reapIntervalSecs={} headless={}",
                config.browser.capacity,
                config.browser.idle_timeout_secs,
                config.browser.reap_interval_secs,
                config.browser.headless
            );
        }
        Err(e) => {
            print_err("config unreadable", &e.to_string());
            err_count += 1;
        }
    }
    println!();

    // Browser binary
    println!("Automation driver");
    match find_browser_binary() {
        Some(path) => print_ok("browser binary", &path),
        None => {
            print_err(
                "no browser binary found",
                "install Chrome, Chromium, or Edge",
            );
            err_count += 1;
        }
    }
    println!();

    // Workspace
    println!("Workspace");
    let workspace = paths.workspace();
    std::fs::create_dir_all(&workspace)?;
    let probe = workspace.join(".doctor_probe");
    match std::fs::write(&probe, "probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            print_ok("workspace writable", &workspace.display().to_string());
        }
        Err(e) => {
            print_err("workspace not writable", &e.to_string());
            err_count += 1;
        }
    }
    println!();

    if err_count == 0 {
        println!("All checks passed.");
        Ok(())
    } else {
        anyhow::bail!("{} check(s) failed", err_count)
    }
}

fn print_ok(label: &str, detail: &str) {
    println!("  [ok] {} — {}", label, detail);
}

fn print_warn(label: &str, detail: &str) {
    println!("  [??] {} — {}", label, detail);
}

fn print_err(label: &str, detail: &str) {
    println!("  [!!] {} — {}", label, detail);
}
