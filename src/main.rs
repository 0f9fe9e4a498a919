fn main() {
    soft_mpm::start();
}
