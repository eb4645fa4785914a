fn main() {
    replycue_lib::run()
}
