// Print the pairing QR code and manual code for a given setup:
//   cargo run --example pairing -- --discriminator 3840 --passcode 20202021

use anyhow::Result;
use clap::Parser;

use matb::onboarding;

#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 0xFFF1)]
    vendor_id: u16,

    #[clap(long, default_value_t = 0x8001)]
    product_id: u16,

    #[clap(long, default_value_t = 3840)]
    discriminator: u16,

    #[clap(long, default_value_t = 20202021)]
    passcode: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    onboarding::print_pairing_info(
        "Pairing Preview",
        "matb-demo",
        args.vendor_id,
        args.product_id,
        args.discriminator,
        args.passcode,
    )?;

    let payload = onboarding::encode_qr_payload(
        args.vendor_id,
        args.product_id,
        args.discriminator,
        args.passcode,
    );
    let decoded = onboarding::decode_qr_payload(&payload)?;
    println!("decoded check: {:?}", decoded);
    Ok(())
}
