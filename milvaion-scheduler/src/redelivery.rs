use lapin::message::Delivery;
use lapin::types::AMQPValue;

/// Reads the broker's `x-death` header array to count how many times this message has
/// already been redelivered, so a consumer can dead-letter it itself once bounded
/// retries are exhausted rather than nack-requeuing forever.
pub fn death_count(delivery: &Delivery) -> u32 {
    let Some(headers) = delivery.properties.headers() else {
        return 0;
    };
    match headers.inner().get("x-death") {
        Some(AMQPValue::FieldArray(deaths)) => deaths.as_slice().len() as u32,
        _ => 0,
    }
}
