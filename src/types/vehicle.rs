//! Imported vehicle types for the fixed-schema preset

use rust_decimal::Decimal;
use uuid::Uuid;

/// A validated vehicle ready for bulk insertion into `imported_vehicles`
#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub job_id: Uuid,
    pub modelo: String,
    pub placa: String,
    pub ano: i32,
    pub valor_fipe: Decimal,
}
