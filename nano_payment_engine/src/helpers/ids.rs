use rand::Rng;

use crate::db_types::InvoiceId;

/// Crockford-style alphabet: no I, L, O or U, so codes stay readable over the phone.
const ID_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Generate a short invoice code from 40 random bits, formatted `XXXX-XXXX`.
pub fn generate_invoice_id() -> InvoiceId {
    let mut rng = rand::thread_rng();
    let random: [u8; 5] = rng.gen();
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut code = String::with_capacity(9);
    for byte in random {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            if code.len() == 4 {
                code.push('-');
            }
            code.push(ID_ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
            acc &= (1 << bits) - 1;
        }
    }
    InvoiceId(code)
}
