/// Main entry point for the model-hub launcher
/// The actual logic lives in the library crate so it can be tested
fn main() {
    // Custom panic handler so a crash does not leave training jobs behind
    // Model scripts run for hours on the GPU; an orphaned one keeps the card busy
    // after the launcher is gone and the user has no handle left to stop it.
    // CRITICAL: cleanup_on_panic only try-locks the registry. The panicking
    // thread may still hold the lock, and blocking here would hang the exit.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        model_hub_lib::cleanup_on_panic();
        std::process::exit(1);
    }));

    // Normal shutdown (quit, EOF, Ctrl-C) stops the models inside run() itself
    if let Err(e) = model_hub_lib::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
