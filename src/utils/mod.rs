pub mod time;

/// Id for actors and correlation tokens.
pub fn longid() -> String {
    nanoid::nanoid!()
}

/// Short id for edges built without an explicit id.
pub fn shortid() -> String {
    nanoid::nanoid!(8)
}
