pub fn main() {
    prakriti_app::cli::launch();
}
