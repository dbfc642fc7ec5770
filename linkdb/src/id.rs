use nanoid::nanoid;

/// Lowercase hexadecimal alphabet used for generated identifiers.
const UID_ALPHABET: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];
/// Three 28-bit hexadecimal groups.
const UID_LENGTH: usize = 21;

/// Generates a random hexadecimal identifier.
pub fn uid() -> String {
    nanoid!(UID_LENGTH, UID_ALPHABET)
}
